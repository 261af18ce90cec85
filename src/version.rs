//! Per-node version/lock word.
//!
//! [`VersionLock`] packs the whole lock state of a node and its version
//! stamp into one `u64`:
//!
//! ```text
//! bit 63 ......................... 18 | 17 | 16 | 15 ............. 0
//!        version (bumped per mutation) |  X | SIX |  shared count
//! ```
//!
//! Three lock modes coexist with optimistic readers:
//!
//! - **S** (shared): many holders; blocked only by X.
//! - **SIX** (shared-intention-exclusive): one holder; coexists with S.
//!   Reserves the right to upgrade to X without letting another structure
//!   modification in.
//! - **X** (exclusive): sole holder; blocks S, SIX, and optimistic
//!   validation.
//!
//! Every mutation that changes key visibility bumps the version by
//! [`VERSION_UNIT`] strictly before the X lock is released, so a reader
//! that validated a snapshot is guaranteed to have seen a consistent
//! node image.

use std::hint;
use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};

// ============================================================================
//  Bit constants
// ============================================================================

/// Mask of the shared-lock holder count.
const S_MASK: u64 = 0xFFFF;

/// Shared-intention-exclusive bit.
const SIX_BIT: u64 = 1 << 16;

/// Exclusive bit.
const X_BIT: u64 = 1 << 17;

/// All lock-state bits.
const LOCK_MASK: u64 = S_MASK | SIX_BIT | X_BIT;

/// One version increment.
pub const VERSION_UNIT: u64 = 1 << 18;

/// Mask of the version bits.
const VERSION_MASK: u64 = !LOCK_MASK;

// ============================================================================
//  VersionLock
// ============================================================================

/// A versioned lock word for tree nodes.
#[derive(Debug)]
pub struct VersionLock {
    word: AtomicU64,
}

/// Compute the version stamp that preceded `ver`.
///
/// Used to hand a pre-mutation snapshot to a caller that only observed the
/// post-mutation stamp.
#[inline]
#[must_use]
pub const fn previous_version(ver: u64) -> u64 {
    ((ver >> 18) - 1) << 18
}

impl VersionLock {
    /// Create an unlocked word at version zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// Create a word that is already exclusively locked.
    ///
    /// Fresh nodes produced by a split start locked so that sibling-chain
    /// readers arriving early spin until the split publishes.
    #[must_use]
    pub const fn new_locked_x() -> Self {
        Self {
            word: AtomicU64::new(X_BIT),
        }
    }

    // ========================================================================
    //  Optimistic protocol
    // ========================================================================

    /// Take a version snapshot for optimistic reading.
    ///
    /// Spins while an exclusive holder is active; the returned value has
    /// the lock bits cleared.
    #[inline]
    #[must_use]
    pub fn get_version(&self) -> u64 {
        loop {
            let v: u64 = self.word.load(READ_ORD);
            if v & X_BIT == 0 {
                return v & VERSION_MASK;
            }
            hint::spin_loop();
        }
    }

    /// Check that the node is unchanged since `old` and not exclusively
    /// locked right now.
    #[inline]
    #[must_use]
    pub fn validate_version(&self, old: u64) -> bool {
        let v: u64 = self.word.load(READ_ORD);
        v & X_BIT == 0 && v & VERSION_MASK == old
    }

    /// Current version stamp without stability guarantees (diagnostics).
    #[inline]
    #[must_use]
    pub fn version_relaxed(&self) -> u64 {
        self.word.load(RELAXED) & VERSION_MASK
    }

    // ========================================================================
    //  Shared lock
    // ========================================================================

    /// Acquire a shared lock. Blocks while an exclusive holder is active;
    /// coexists with other S holders and with a SIX holder.
    pub fn lock_s(&self) {
        loop {
            let v: u64 = self.word.load(READ_ORD);
            if v & X_BIT != 0 {
                hint::spin_loop();
                continue;
            }
            debug_assert!(v & S_MASK < S_MASK, "shared count overflow");
            if self
                .word
                .compare_exchange_weak(v, v + 1, CAS_SUCCESS, CAS_FAILURE)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Release a shared lock.
    #[inline]
    pub fn unlock_s(&self) {
        let prev: u64 = self.word.fetch_sub(1, WRITE_ORD);
        debug_assert!(prev & S_MASK > 0, "unlock_s without holder");
    }

    // ========================================================================
    //  SIX lock
    // ========================================================================

    /// Acquire the shared-intention-exclusive lock. At most one holder;
    /// blocks while another SIX or an X holder is active.
    pub fn lock_six(&self) {
        loop {
            let v: u64 = self.word.load(READ_ORD);
            if v & (X_BIT | SIX_BIT) != 0 {
                hint::spin_loop();
                continue;
            }
            if self
                .word
                .compare_exchange_weak(v, v | SIX_BIT, CAS_SUCCESS, CAS_FAILURE)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Try to acquire SIX without blocking.
    #[must_use]
    pub fn try_lock_six(&self) -> bool {
        let v: u64 = self.word.load(READ_ORD);
        if v & (X_BIT | SIX_BIT) != 0 {
            return false;
        }
        self.word
            .compare_exchange(v, v | SIX_BIT, CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
    }

    /// Release the SIX lock without upgrading.
    #[inline]
    pub fn unlock_six(&self) {
        let prev: u64 = self.word.fetch_and(!SIX_BIT, WRITE_ORD);
        debug_assert!(prev & SIX_BIT != 0, "unlock_six without holder");
    }

    // ========================================================================
    //  Exclusive lock
    // ========================================================================

    /// Acquire the exclusive lock from the unlocked state. Blocks while
    /// any other holder (S, SIX, or X) is active.
    pub fn lock_x(&self) {
        loop {
            let v: u64 = self.word.load(READ_ORD);
            if v & LOCK_MASK != 0 {
                hint::spin_loop();
                continue;
            }
            if self
                .word
                .compare_exchange_weak(v, v | X_BIT, CAS_SUCCESS, CAS_FAILURE)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Upgrade a held SIX lock to X.
    ///
    /// Sets the X bit first (shutting out new S holders), then waits for
    /// the shared count to drain. Only the SIX holder may call this, so
    /// two upgrades can never race.
    pub fn upgrade_six_to_x(&self) {
        let prev: u64 = self.word.fetch_or(X_BIT, CAS_SUCCESS);
        debug_assert!(prev & SIX_BIT != 0, "upgrade without SIX held");
        debug_assert!(prev & X_BIT == 0, "upgrade with X already set");
        while self.word.load(READ_ORD) & S_MASK != 0 {
            hint::spin_loop();
        }
    }

    /// Release the exclusive lock without a version bump.
    ///
    /// Used when the exclusive section did not change key visibility.
    #[inline]
    pub fn unlock_x(&self) {
        let v: u64 = self.word.load(RELAXED);
        debug_assert!(v & X_BIT != 0, "unlock_x without holder");
        // The word is stable while X is held (acquirers only spin), so a
        // plain store suffices.
        self.word.store(v & !(X_BIT | SIX_BIT), WRITE_ORD);
    }

    /// Release the exclusive lock, bumping the version.
    ///
    /// Returns the new version stamp.
    #[inline]
    pub fn unlock_x_bump(&self) -> u64 {
        let v: u64 = self.word.load(RELAXED);
        debug_assert!(v & X_BIT != 0, "unlock_x_bump without holder");
        let new: u64 = (v & !(X_BIT | SIX_BIT)) + VERSION_UNIT;
        self.word.store(new, WRITE_ORD);
        new & VERSION_MASK
    }

    /// Downgrade a held X lock to SIX, bumping the version.
    ///
    /// Used by `delete` when the node underflowed: the mutation is
    /// published, but the holder keeps the right to drive a merge.
    #[inline]
    pub fn downgrade_x_to_six_bump(&self) -> u64 {
        let v: u64 = self.word.load(RELAXED);
        debug_assert!(v & X_BIT != 0, "downgrade without X holder");
        let new: u64 = ((v & !X_BIT) | SIX_BIT) + VERSION_UNIT;
        self.word.store(new, WRITE_ORD);
        new & VERSION_MASK
    }

    // ========================================================================
    //  Introspection (debug assertions)
    // ========================================================================

    /// Whether the X bit is currently set.
    #[inline]
    #[must_use]
    pub fn is_locked_x(&self) -> bool {
        self.word.load(RELAXED) & X_BIT != 0
    }

    /// Whether the SIX bit is currently set.
    #[inline]
    #[must_use]
    pub fn is_locked_six(&self) -> bool {
        self.word.load(RELAXED) & SIX_BIT != 0
    }
}

impl Default for VersionLock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_validate_roundtrip() {
        let lock = VersionLock::new();
        let v: u64 = lock.get_version();
        assert!(lock.validate_version(v));
    }

    #[test]
    fn test_bump_invalidates_snapshot() {
        let lock = VersionLock::new();
        let v: u64 = lock.get_version();

        lock.lock_x();
        let new: u64 = lock.unlock_x_bump();

        assert!(!lock.validate_version(v));
        assert!(lock.validate_version(new));
        assert_eq!(new, v + VERSION_UNIT);
    }

    #[test]
    fn test_plain_unlock_keeps_version() {
        let lock = VersionLock::new();
        let v: u64 = lock.get_version();

        lock.lock_x();
        lock.unlock_x();

        assert!(lock.validate_version(v));
    }

    #[test]
    fn test_validate_fails_under_x() {
        let lock = VersionLock::new();
        let v: u64 = lock.get_version();

        lock.lock_x();
        assert!(!lock.validate_version(v));
        lock.unlock_x();
        assert!(lock.validate_version(v));
    }

    #[test]
    fn test_shared_coexists_with_six() {
        let lock = VersionLock::new();
        lock.lock_s();
        assert!(lock.try_lock_six());
        // A second SIX is rejected.
        assert!(!lock.try_lock_six());
        lock.unlock_six();
        lock.unlock_s();
    }

    #[test]
    fn test_six_upgrade_and_downgrade() {
        let lock = VersionLock::new();
        let v0: u64 = lock.get_version();

        lock.lock_six();
        lock.upgrade_six_to_x();
        assert!(lock.is_locked_x());

        let v1: u64 = lock.downgrade_x_to_six_bump();
        assert!(!lock.is_locked_x());
        assert!(lock.is_locked_six());
        assert_eq!(v1, v0 + VERSION_UNIT);

        lock.unlock_six();
        assert!(lock.validate_version(v1));
    }

    #[test]
    fn test_previous_version() {
        let lock = VersionLock::new();
        lock.lock_x();
        let v1: u64 = lock.unlock_x_bump();
        lock.lock_x();
        let v2: u64 = lock.unlock_x_bump();

        assert_eq!(previous_version(v2), v1);
    }

    #[test]
    fn test_new_locked_x_starts_exclusive() {
        let lock = VersionLock::new_locked_x();
        assert!(lock.is_locked_x());
        lock.unlock_x_bump();
        assert!(!lock.is_locked_x());
    }

    #[test]
    fn test_concurrent_shared_holders() {
        use std::sync::Arc;
        use std::thread;

        let lock = Arc::new(VersionLock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        lock.lock_s();
                        lock.unlock_s();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        // All holders drained.
        lock.lock_x();
        lock.unlock_x();
    }
}
