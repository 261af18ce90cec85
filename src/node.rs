//! Page-resident tree node: layout and per-node operations.
//!
//! One [`Node`] occupies one [`Page`]. The header carries the version/lock
//! word, flags, counters, sibling links, and the high key; the data area
//! holds a sorted metadata directory growing from the front and record
//! bytes (key then payload) growing from the back:
//!
//! ```text
//! | header | meta[0] meta[1] ... ->      free      <- ... rec[1] rec[0] |
//! ```
//!
//! Leaf deletes are tombstones (the directory entry stays with its deleted
//! bit set); inner-node deletes are physical. Tombstoned bytes are
//! reclaimed by defragmentation when an insert runs out of space.
//!
//! # Concurrency discipline
//!
//! All mutating operations require the caller to hold the exclusive lock
//! (acquired through [`Node::check_key_range_and_lock_for_write`]) and
//! release it themselves, bumping the version exactly when visibility
//! changed. Optimistic readers snapshot the version, read, and validate;
//! every field a reader touches is either an atomic or a byte range whose
//! interpretation is discarded when validation fails.

pub(crate) mod meta;

use std::cell::UnsafeCell;
use std::cmp::Ordering as KeyOrdering;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU32, AtomicU64};

use crate::alloc::Page;
use crate::consts::{
    INNER_FLAG, LEAF_FLAG, MAX_KEY_LEN, META_LEN, MIN_FREE_SPACE, MIN_USED_SPACE, PAGE_SIZE,
};
use crate::error::NodeRc;
use crate::key::KeyComparator;
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::version::VersionLock;

use meta::Meta;

/// Removed-node flag: the page has been evicted by a merge or root shrink
/// and is awaiting reclamation.
const REMOVED_FLAG: u32 = 1 << 1;

/// Exact header footprint; checked against the real layout below.
pub(crate) const NODE_HEADER_LEN: usize = 48;

/// Capacity of the data area.
pub(crate) const DATA_CAP: usize = PAGE_SIZE - NODE_HEADER_LEN;

/// Usable block capacity once the high key is accounted for.
pub(crate) const MIN_BLOCK_SIZE: usize = DATA_CAP - MAX_KEY_LEN;

/// Upper bound on combined live bytes for a merge to be admissible.
const MERGE_LIMIT: usize = MIN_BLOCK_SIZE - MIN_FREE_SPACE;

/// Signal that the current node chain became unusable (a node on it was
/// retired); the caller restarts its descent from the root.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Restart;

/// View a payload value as its raw bytes for storage in a node.
#[inline]
pub(crate) fn payload_bytes<T>(value: &T) -> &[u8] {
    // SAFETY: any T is readable as size_of::<T>() bytes; the bytes are
    // only ever copied back out via read_unaligned::<T>.
    unsafe { slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) }
}

// ============================================================================
//  Node
// ============================================================================

/// A tree node in page-resident form.
#[repr(C)]
pub(crate) struct Node {
    /// Lock state and version stamp.
    version: VersionLock,
    /// `INNER_FLAG` and `REMOVED_FLAG` bits.
    flags: AtomicU32,
    /// Number of directory entries, tombstones included.
    record_count: AtomicU16,
    /// Bytes consumed at the back of the data area (records + high key,
    /// dead bytes included).
    block_size: AtomicU16,
    /// Bytes attributable to tombstones and dead fragments.
    deleted_size: AtomicU16,
    /// Directory entry of the high key; `Meta::NULL` on the rightmost
    /// node of a level (high key = +inf).
    high_key: AtomicU64,
    /// Right sibling, or null on the rightmost node.
    next: AtomicPtr<Node>,
    /// Left sibling, or null on the leftmost node.
    prev: AtomicPtr<Node>,
    /// Directory (front) and record block (back).
    data: UnsafeCell<[u8; DATA_CAP]>,
}

const _: () = {
    assert!(size_of::<Node>() == PAGE_SIZE);
    assert!(align_of::<Node>() <= 64);
    // Two maximum-size records must always fit beside the high key.
    assert!(2 * crate::consts::MAX_RECORD_LEN <= MIN_BLOCK_SIZE);
};

// SAFETY: all shared state is atomic or guarded by the version protocol.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

// ============================================================================
//  Construction
// ============================================================================

impl Node {
    /// Initialize a page as an empty node.
    ///
    /// Fresh split targets start exclusively locked so that sibling-chain
    /// readers arriving through `next` spin until the split publishes.
    ///
    /// # Safety
    ///
    /// `page` must be a valid page not reachable by any other thread.
    pub(crate) unsafe fn init(page: *mut Page, is_inner: bool, locked: bool) -> *mut Node {
        let node: *mut Node = page.cast::<Node>();
        let version = if locked {
            VersionLock::new_locked_x()
        } else {
            VersionLock::new()
        };
        let flags: u32 = if is_inner { INNER_FLAG } else { LEAF_FLAG };

        // SAFETY: the page is exclusively ours; write every header field.
        unsafe {
            ptr::write(&raw mut (*node).version, version);
            ptr::write(&raw mut (*node).flags, AtomicU32::new(flags));
            ptr::write(&raw mut (*node).record_count, AtomicU16::new(0));
            ptr::write(&raw mut (*node).block_size, AtomicU16::new(0));
            ptr::write(&raw mut (*node).deleted_size, AtomicU16::new(0));
            ptr::write(&raw mut (*node).high_key, AtomicU64::new(Meta::NULL.raw()));
            ptr::write(&raw mut (*node).next, AtomicPtr::new(ptr::null_mut()));
            ptr::write(&raw mut (*node).prev, AtomicPtr::new(ptr::null_mut()));
        }
        node
    }

    /// Initialize a page as a new inner root over a freshly split pair.
    ///
    /// Record 0 carries the implicit minus-infinity separator (empty key);
    /// record 1 carries `sep_key`.
    ///
    /// # Safety
    ///
    /// Same as [`Self::init`]; `left`/`right` must be valid nodes.
    pub(crate) unsafe fn init_root(
        page: *mut Page,
        sep_key: &[u8],
        left: *mut Node,
        right: *mut Node,
    ) -> *mut Node {
        // SAFETY: forwarded contract.
        let node: *mut Node = unsafe { Self::init(page, true, false) };
        let n: &Node = unsafe { &*node };
        n.append_record(b"", payload_bytes(&left));
        n.append_record(sep_key, payload_bytes(&right));
        node
    }

    // ========================================================================
    //  Header accessors
    // ========================================================================

    #[inline]
    pub(crate) fn version(&self) -> &VersionLock {
        &self.version
    }

    #[inline]
    pub(crate) fn is_inner(&self) -> bool {
        self.flags.load(READ_ORD) & INNER_FLAG != 0
    }

    #[inline]
    pub(crate) fn is_removed(&self) -> bool {
        self.flags.load(READ_ORD) & REMOVED_FLAG != 0
    }

    /// Mark this node as evicted. Caller holds X.
    #[inline]
    pub(crate) fn mark_removed(&self) {
        self.flags.fetch_or(REMOVED_FLAG, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn record_count(&self) -> usize {
        self.record_count.load(READ_ORD) as usize
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut Node {
        self.next.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn prev(&self) -> *mut Node {
        self.prev.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut Node) {
        self.next.store(next, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: *mut Node) {
        self.prev.store(prev, WRITE_ORD);
    }

    #[inline]
    fn block_size(&self) -> usize {
        self.block_size.load(READ_ORD) as usize
    }

    #[inline]
    fn deleted_size(&self) -> usize {
        self.deleted_size.load(READ_ORD) as usize
    }

    /// Bytes of free space between the directory and the record block.
    #[inline]
    pub(crate) fn free_space(&self) -> usize {
        DATA_CAP - self.record_count() * META_LEN - self.block_size()
    }

    /// Live bytes: directory plus record block minus dead fragments.
    #[inline]
    pub(crate) fn live_size(&self) -> usize {
        self.record_count() * META_LEN + self.block_size() - self.deleted_size()
    }

    /// Header + live bytes, for statistics.
    #[inline]
    pub(crate) fn node_usage(&self) -> usize {
        NODE_HEADER_LEN + self.live_size()
    }

    // ========================================================================
    //  Data-area primitives
    // ========================================================================

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        self.data.get().cast::<u8>()
    }

    /// The directory slot `i` viewed as an atomic word.
    #[inline]
    fn meta_slot(&self, i: usize) -> &AtomicU64 {
        debug_assert!(i * META_LEN < DATA_CAP);
        // SAFETY: slot i lies inside the data area and is 8-byte aligned
        // (the data area starts at offset NODE_HEADER_LEN, a multiple of 8).
        unsafe { AtomicU64::from_ptr(self.data_ptr().add(i * META_LEN).cast::<u64>()) }
    }

    #[inline]
    pub(crate) fn meta_at(&self, i: usize) -> Meta {
        Meta::from_raw(self.meta_slot(i).load(READ_ORD))
    }

    #[inline]
    fn set_meta(&self, i: usize, m: Meta) {
        self.meta_slot(i).store(m.raw(), WRITE_ORD);
    }

    #[inline]
    fn high_key_meta(&self) -> Meta {
        Meta::from_raw(self.high_key.load(READ_ORD))
    }

    /// Key bytes described by `m`.
    ///
    /// Under a lock the slice is stable; on optimistic paths its contents
    /// may be torn and any conclusion drawn from it must be re-validated.
    #[inline]
    fn key_at(&self, m: Meta) -> &[u8] {
        debug_assert!(m.offset() + m.key_len() <= DATA_CAP);
        // SAFETY: committed metadata words always describe in-bounds ranges.
        unsafe { slice::from_raw_parts(self.data_ptr().add(m.offset()), m.key_len()) }
    }

    /// Copy the payload described by `m` out as a `T`.
    #[inline]
    fn read_payload<T>(&self, m: Meta) -> T {
        debug_assert_eq!(m.payload_len(), size_of::<T>());
        debug_assert!(m.offset() + m.record_len() <= DATA_CAP);
        // SAFETY: in-bounds per the metadata invariant; the bytes were
        // written from a valid T (or the caller revalidates the version
        // and discards this value).
        unsafe {
            ptr::read_unaligned(
                self.data_ptr()
                    .add(m.offset() + m.key_len())
                    .cast::<T>()
                    .cast_const(),
            )
        }
    }

    /// Child pointer stored in record `i` (inner nodes).
    #[inline]
    pub(crate) fn child_at(&self, i: usize) -> *mut Node {
        debug_assert!(self.is_inner());
        self.read_payload::<*mut Node>(self.meta_at(i))
    }

    /// The key of record `i`, copied out.
    pub(crate) fn key_owned(&self, i: usize) -> Vec<u8> {
        self.key_at(self.meta_at(i)).to_vec()
    }

    /// The key of record `i`, borrowed in place. Only stable under a
    /// lock.
    pub(crate) fn key_ref(&self, i: usize) -> &[u8] {
        self.key_at(self.meta_at(i))
    }

    /// The payload of record `i`, copied out as a `V`. Only stable under
    /// a lock.
    pub(crate) fn payload_copy<V>(&self, i: usize) -> V {
        self.read_payload::<V>(self.meta_at(i))
    }

    /// The high key, copied out; `None` on a rightmost node.
    pub(crate) fn high_key_owned(&self) -> Option<Vec<u8>> {
        let m: Meta = self.high_key_meta();
        if m.is_null() {
            return None;
        }
        Some(self.key_at(m).to_vec())
    }

    /// Whether `key` falls below this node's high key.
    #[inline]
    pub(crate) fn covers<C: KeyComparator>(&self, key: &[u8]) -> bool {
        let m: Meta = self.high_key_meta();
        m.is_null() || C::compare(key, self.key_at(m)) == KeyOrdering::Less
    }

    /// Reserve `len` bytes at the back of the data area and return the
    /// offset of the reservation. Caller holds X (or owns the node).
    fn alloc_block(&self, len: usize) -> usize {
        let new_block: usize = self.block_size() + len;
        debug_assert!(self.record_count() * META_LEN + new_block <= DATA_CAP);
        self.block_size.store(new_block as u16, WRITE_ORD);
        DATA_CAP - new_block
    }

    /// Write `key`/`payload` bytes at `offset`.
    fn write_record_bytes(&self, offset: usize, key: &[u8], payload: &[u8]) {
        debug_assert!(offset + key.len() + payload.len() <= DATA_CAP);
        // SAFETY: the range was reserved by alloc_block and nothing else
        // addresses it yet.
        unsafe {
            ptr::copy_nonoverlapping(key.as_ptr(), self.data_ptr().add(offset), key.len());
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data_ptr().add(offset + key.len()),
                payload.len(),
            );
        }
    }

    /// Install the high key. Caller holds X (or owns the node).
    pub(crate) fn set_high_key(&self, key: &[u8]) {
        debug_assert!(key.len() <= MAX_KEY_LEN);
        let offset: usize = self.alloc_block(key.len());
        // SAFETY: freshly reserved range.
        unsafe { ptr::copy_nonoverlapping(key.as_ptr(), self.data_ptr().add(offset), key.len()) };
        let old: Meta = self.high_key_meta();
        if !old.is_null() {
            self.bury_bytes(old.key_len());
        }
        self.high_key
            .store(Meta::new(offset, key.len(), 0).raw(), WRITE_ORD);
    }

    /// Clear the high key (the node becomes rightmost).
    fn clear_high_key(&self) {
        let old: Meta = self.high_key_meta();
        if !old.is_null() {
            self.bury_bytes(old.key_len());
        }
        self.high_key.store(Meta::NULL.raw(), WRITE_ORD);
    }

    /// Account `len` block bytes as dead.
    #[inline]
    fn bury_bytes(&self, len: usize) {
        let dead: usize = self.deleted_size() + len;
        self.deleted_size.store(dead as u16, WRITE_ORD);
    }

    // ========================================================================
    //  Searching
    // ========================================================================

    /// Binary-search the directory for `key`.
    ///
    /// `Ok(pos)` is an exact match (possibly a tombstone); `Err(pos)` is
    /// the insertion point.
    pub(crate) fn search_record<C: KeyComparator>(&self, key: &[u8]) -> Result<usize, usize> {
        let mut lo: usize = 0;
        let mut hi: usize = self.record_count();
        while lo < hi {
            let mid: usize = lo + (hi - lo) / 2;
            match C::compare(self.key_at(self.meta_at(mid)), key) {
                KeyOrdering::Less => lo = mid + 1,
                KeyOrdering::Greater => hi = mid,
                KeyOrdering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Position of the child covering `key` in an inner node: the last
    /// record whose separator is `<= key`.
    ///
    /// Record 0 is the implicit minus-infinity separator and is never
    /// compared, so border-node routing is independent of the comparator.
    pub(crate) fn search_child_pos<C: KeyComparator>(&self, key: &[u8]) -> usize {
        let count: usize = self.record_count();
        debug_assert!(count > 0);
        let mut lo: usize = 0; // invariant: separator(lo) <= key
        let mut hi: usize = count;
        while lo + 1 < hi {
            let mid: usize = lo + (hi - lo) / 2;
            match C::compare(self.key_at(self.meta_at(mid)), key) {
                KeyOrdering::Greater => hi = mid,
                _ => lo = mid,
            }
        }
        lo
    }

    // ========================================================================
    //  Optimistic navigation
    // ========================================================================

    /// Read the payload for `key`, walking the sibling chain if a
    /// concurrent split moved the key right.
    ///
    /// Returns the payload (if any), the validated version snapshot, and
    /// the node that owned the key.
    ///
    /// # Safety
    ///
    /// `node` must point to a live node reached under the caller's epoch
    /// guard.
    pub(crate) unsafe fn read<C: KeyComparator, V>(
        mut node: *mut Node,
        key: &[u8],
    ) -> Result<(Option<V>, u64, *mut Node), Restart> {
        loop {
            // SAFETY: node is live (epoch guard) by the caller's contract.
            let n: &Node = unsafe { &*node };
            let ver: u64 = n.version.get_version();
            if n.is_removed() {
                return Err(Restart);
            }
            if !n.covers::<C>(key) {
                let next: *mut Node = n.next();
                if n.version.validate_version(ver) {
                    node = next;
                }
                continue;
            }
            let result: Option<V> = match n.search_record::<C>(key) {
                Ok(pos) => {
                    let m: Meta = n.meta_at(pos);
                    if m.is_deleted() {
                        None
                    } else {
                        Some(n.read_payload::<V>(m))
                    }
                }
                Err(_) => None,
            };
            if n.version.validate_version(ver) {
                return Ok((result, ver, node));
            }
        }
    }

    /// One descent step: find the child covering `key`, walking right as
    /// needed. Returns the owning node and the child pointer.
    ///
    /// # Safety
    ///
    /// As [`Self::read`].
    pub(crate) unsafe fn search_child<C: KeyComparator>(
        mut node: *mut Node,
        key: &[u8],
    ) -> Result<(*mut Node, *mut Node), Restart> {
        loop {
            // SAFETY: caller's contract.
            let n: &Node = unsafe { &*node };
            let ver: u64 = n.version.get_version();
            if n.is_removed() {
                return Err(Restart);
            }
            if !n.covers::<C>(key) {
                let next: *mut Node = n.next();
                if n.version.validate_version(ver) {
                    node = next;
                }
                continue;
            }
            let pos: usize = n.search_child_pos::<C>(key);
            let child: *mut Node = n.child_at(pos);
            if n.version.validate_version(ver) {
                return Ok((node, child));
            }
        }
    }

    /// Walk the sibling chain without locking until the node owning `key`
    /// is found. Used when rebuilding an ancestor stack.
    ///
    /// # Safety
    ///
    /// As [`Self::read`].
    pub(crate) unsafe fn check_key_range<C: KeyComparator>(
        mut node: *mut Node,
        key: &[u8],
    ) -> Result<*mut Node, Restart> {
        loop {
            // SAFETY: caller's contract.
            let n: &Node = unsafe { &*node };
            let ver: u64 = n.version.get_version();
            if n.is_removed() {
                return Err(Restart);
            }
            if n.covers::<C>(key) {
                if n.version.validate_version(ver) {
                    return Ok(node);
                }
                continue;
            }
            let next: *mut Node = n.next();
            if n.version.validate_version(ver) {
                node = next;
            }
        }
    }

    /// Walk the sibling chain and return the node owning `key` with its
    /// exclusive lock held.
    ///
    /// # Safety
    ///
    /// As [`Self::read`].
    pub(crate) unsafe fn check_key_range_and_lock_for_write<C: KeyComparator>(
        mut node: *mut Node,
        key: &[u8],
    ) -> Result<*mut Node, Restart> {
        loop {
            // SAFETY: caller's contract.
            let n: &Node = unsafe { &*node };
            n.version.lock_x();
            if n.is_removed() {
                n.version.unlock_x();
                return Err(Restart);
            }
            if n.covers::<C>(key) {
                return Ok(node);
            }
            let next: *mut Node = n.next();
            debug_assert!(!next.is_null());
            n.version.unlock_x();
            node = next;
        }
    }

    /// Walk the sibling chain and return the node owning `key` (or the
    /// first node when `key` is `None`) with a shared lock held. Entry
    /// point of range scans.
    ///
    /// # Safety
    ///
    /// As [`Self::read`].
    pub(crate) unsafe fn lock_s_for_range<C: KeyComparator>(
        mut node: *mut Node,
        key: Option<&[u8]>,
    ) -> Result<*mut Node, Restart> {
        loop {
            // SAFETY: caller's contract.
            let n: &Node = unsafe { &*node };
            n.version.lock_s();
            if n.is_removed() {
                n.version.unlock_s();
                return Err(Restart);
            }
            match key {
                Some(k) if !n.covers::<C>(k) => {
                    let next: *mut Node = n.next();
                    debug_assert!(!next.is_null());
                    n.version.unlock_s();
                    node = next;
                }
                _ => return Ok(node),
            }
        }
    }

    /// Move the scan to the next leaf: lock it shared, then release the
    /// current leaf (lock coupling, left to right).
    ///
    /// # Safety
    ///
    /// Caller holds S on `self`; the high key must be present (i.e. this
    /// is not the rightmost leaf).
    pub(crate) unsafe fn next_for_read(&self) -> *mut Node {
        let next: *mut Node = self.next();
        debug_assert!(!next.is_null());
        // SAFETY: next is non-null and cannot be retired while we hold S
        // on self (its absorption would require X on self).
        unsafe { (*next).version.lock_s() };
        self.version.unlock_s();
        next
    }

    /// Find the first position of the scan range under a held S lock.
    pub(crate) fn search_begin_position<C: KeyComparator>(
        &self,
        begin: Option<(&[u8], bool)>,
    ) -> usize {
        match begin {
            None => 0,
            Some((key, inclusive)) => match self.search_record::<C>(key) {
                Ok(pos) if inclusive => pos,
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            },
        }
    }

    /// Find the end position of the scan range in this node under a held
    /// S lock. Returns `(is_terminal, end_pos)`.
    pub(crate) fn search_end_position<C: KeyComparator>(
        &self,
        end: Option<(&[u8], bool)>,
    ) -> (bool, usize) {
        let count: usize = self.record_count();
        match end {
            None => (self.high_key_meta().is_null(), count),
            Some((key, inclusive)) => {
                if !self.covers::<C>(key) {
                    return (false, count);
                }
                match self.search_record::<C>(key) {
                    Ok(pos) if inclusive => (true, pos + 1),
                    Ok(pos) => (true, pos),
                    Err(pos) => (true, pos),
                }
            }
        }
    }

    // ========================================================================
    //  Leaf mutations (caller holds X)
    // ========================================================================

    /// Upsert `key -> payload`. Releases the lock on completion; keeps it
    /// when a split is required.
    pub(crate) fn write<C: KeyComparator>(&self, key: &[u8], payload: &[u8]) -> NodeRc {
        debug_assert!(self.version.is_locked_x());
        match self.search_record::<C>(key) {
            Ok(pos) => {
                self.overwrite_payload(pos, payload);
                self.version.unlock_x_bump();
                NodeRc::Completed
            }
            Err(_) => {
                if !self.ensure_space(key.len() + payload.len()) {
                    return NodeRc::NeedSplit;
                }
                // Defragmentation may have shifted the insertion point.
                let pos: usize = match self.search_record::<C>(key) {
                    Err(p) => p,
                    Ok(_) => unreachable!("defragmentation does not add records"),
                };
                self.insert_record_at(pos, key, payload);
                self.version.unlock_x_bump();
                NodeRc::Completed
            }
        }
    }

    /// Insert `key -> payload` iff absent. On a present key, returns the
    /// existing payload and the version under which it was observed.
    /// Releases the lock except in the `NeedSplit` case.
    pub(crate) fn insert<C: KeyComparator, V>(
        &self,
        key: &[u8],
        payload: &[u8],
    ) -> (NodeRc, u64, Option<V>) {
        debug_assert!(self.version.is_locked_x());
        match self.search_record::<C>(key) {
            Ok(pos) => {
                let m: Meta = self.meta_at(pos);
                if m.is_deleted() {
                    // Revive the tombstone in place.
                    self.overwrite_payload(pos, payload);
                    let ver: u64 = self.version.unlock_x_bump();
                    (NodeRc::Completed, ver, None)
                } else {
                    let existing: V = self.read_payload::<V>(m);
                    let ver: u64 = self.version.version_relaxed();
                    self.version.unlock_x();
                    (NodeRc::KeyAlreadyInserted, ver, Some(existing))
                }
            }
            Err(_) => {
                if !self.ensure_space(key.len() + payload.len()) {
                    return (NodeRc::NeedSplit, 0, None);
                }
                let pos: usize = match self.search_record::<C>(key) {
                    Err(p) => p,
                    Ok(_) => unreachable!("defragmentation does not add records"),
                };
                self.insert_record_at(pos, key, payload);
                let ver: u64 = self.version.unlock_x_bump();
                (NodeRc::Completed, ver, None)
            }
        }
    }

    /// Overwrite the payload iff the key is present. Always releases the
    /// lock.
    pub(crate) fn update<C: KeyComparator>(&self, key: &[u8], payload: &[u8]) -> NodeRc {
        debug_assert!(self.version.is_locked_x());
        match self.search_record::<C>(key) {
            Ok(pos) if !self.meta_at(pos).is_deleted() => {
                self.overwrite_payload(pos, payload);
                self.version.unlock_x_bump();
                NodeRc::Completed
            }
            _ => {
                self.version.unlock_x();
                NodeRc::KeyNotInserted
            }
        }
    }

    /// Tombstone the record iff present. On underflow the lock is
    /// downgraded to SIX and `NeedMerge` is returned; otherwise the lock
    /// is released.
    pub(crate) fn delete<C: KeyComparator>(&self, key: &[u8]) -> NodeRc {
        debug_assert!(self.version.is_locked_x());
        match self.search_record::<C>(key) {
            Ok(pos) if !self.meta_at(pos).is_deleted() => {
                let m: Meta = self.meta_at(pos);
                self.set_meta(pos, m.as_deleted());
                self.bury_bytes(META_LEN + m.record_len());
                if self.live_size() < MIN_USED_SPACE {
                    self.version.downgrade_x_to_six_bump();
                    NodeRc::NeedMerge
                } else {
                    self.version.unlock_x_bump();
                    NodeRc::Completed
                }
            }
            _ => {
                self.version.unlock_x();
                NodeRc::KeyNotInserted
            }
        }
    }

    /// Overwrite the payload of record `pos`, reviving a tombstone if
    /// necessary. Payload lengths are fixed per level, so the bytes fit
    /// in place.
    fn overwrite_payload(&self, pos: usize, payload: &[u8]) {
        let m: Meta = self.meta_at(pos);
        debug_assert_eq!(m.payload_len(), payload.len());
        // SAFETY: in-bounds per the metadata invariant; concurrent
        // optimistic readers discard torn bytes via validation.
        unsafe {
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data_ptr().add(m.offset() + m.key_len()),
                payload.len(),
            );
        }
        if m.is_deleted() {
            self.set_meta(pos, m.as_live());
            let dead: usize = self.deleted_size() - (META_LEN + m.record_len());
            self.deleted_size.store(dead as u16, WRITE_ORD);
        }
    }

    /// Make room for a record of `rec_len` bytes, defragmenting if the
    /// dead bytes would cover the deficit. Returns false when the node
    /// must split.
    fn ensure_space(&self, rec_len: usize) -> bool {
        let needed: usize = rec_len + META_LEN + MIN_FREE_SPACE;
        if self.free_space() >= needed {
            return true;
        }
        if self.free_space() + self.deleted_size() >= needed {
            self.defragment();
            return self.free_space() >= needed;
        }
        false
    }

    /// Rewrite the node with tombstones and dead fragments dropped.
    /// Caller holds X (or owns the node).
    fn defragment(&self) {
        let live: Vec<Meta> = self.live_metas();
        self.rebuild(&live, self.high_key_owned().as_deref());
    }

    /// Collect the directory entries of live records, in key order.
    fn live_metas(&self) -> Vec<Meta> {
        (0..self.record_count())
            .map(|i| self.meta_at(i))
            .filter(|m| !m.is_deleted())
            .collect()
    }

    /// Rebuild the node in place from `live` entries (whose byte ranges
    /// reference the current block) and an optional high key.
    fn rebuild(&self, live: &[Meta], high_key: Option<&[u8]>) {
        let mut buf: Vec<u8> = Vec::with_capacity(DATA_CAP);
        let mut lens: Vec<(usize, usize)> = Vec::with_capacity(live.len());
        for m in live {
            buf.extend_from_slice(self.key_at(*m));
            // SAFETY: in-bounds payload range per the metadata invariant.
            let pay: &[u8] = unsafe {
                slice::from_raw_parts(
                    self.data_ptr().add(m.offset() + m.key_len()),
                    m.payload_len(),
                )
            };
            buf.extend_from_slice(pay);
            lens.push((m.key_len(), m.payload_len()));
        }
        let high: Option<Vec<u8>> = high_key.map(<[u8]>::to_vec);

        // Reset and replay.
        self.record_count.store(0, WRITE_ORD);
        self.block_size.store(0, WRITE_ORD);
        self.deleted_size.store(0, WRITE_ORD);
        self.high_key.store(Meta::NULL.raw(), WRITE_ORD);

        let mut cursor: usize = 0;
        for (i, (key_len, pay_len)) in lens.iter().enumerate() {
            let rec: &[u8] = &buf[cursor..cursor + key_len + pay_len];
            cursor += key_len + pay_len;
            let offset: usize = self.alloc_block(rec.len());
            // SAFETY: freshly reserved range.
            unsafe {
                ptr::copy_nonoverlapping(rec.as_ptr(), self.data_ptr().add(offset), rec.len());
            }
            self.set_meta(i, Meta::new(offset, *key_len, *pay_len));
        }
        self.record_count.store(live.len() as u16, WRITE_ORD);
        if let Some(h) = high {
            self.set_high_key(&h);
        }
    }

    /// Insert a record at directory position `pos`, shifting later
    /// entries right. Caller holds X (or owns the node) and has ensured
    /// space.
    fn insert_record_at(&self, pos: usize, key: &[u8], payload: &[u8]) {
        let count: usize = self.record_count();
        debug_assert!(pos <= count);
        let offset: usize = self.alloc_block(key.len() + payload.len());
        self.write_record_bytes(offset, key, payload);
        for i in (pos..count).rev() {
            self.set_meta(i + 1, self.meta_at(i));
        }
        self.set_meta(pos, Meta::new(offset, key.len(), payload.len()));
        self.record_count.store((count + 1) as u16, WRITE_ORD);
    }

    /// Append a record at the end of the directory without shifting.
    /// Build-time only (bulkload, root construction); keys must arrive in
    /// order.
    pub(crate) fn append_record(&self, key: &[u8], payload: &[u8]) {
        let count: usize = self.record_count();
        let offset: usize = self.alloc_block(key.len() + payload.len());
        self.write_record_bytes(offset, key, payload);
        self.set_meta(count, Meta::new(offset, key.len(), payload.len()));
        self.record_count.store((count + 1) as u16, WRITE_ORD);
    }

    // ========================================================================
    //  Inner-node mutations (caller holds X)
    // ========================================================================

    /// Insert the separator entry for a freshly split right child.
    /// Releases the lock except in the `NeedSplit` case.
    pub(crate) fn insert_child<C: KeyComparator>(
        &self,
        right_child: *mut Node,
        sep_key: &[u8],
    ) -> NodeRc {
        debug_assert!(self.version.is_locked_x());
        debug_assert!(self.is_inner());
        let pos: usize = self.search_child_pos::<C>(sep_key);
        let m: Meta = self.meta_at(pos);
        if pos > 0 && C::compare(self.key_at(m), sep_key) == KeyOrdering::Equal {
            if self.child_at(pos) == right_child {
                // The entry is already in place (a retried completion).
                self.version.unlock_x();
                return NodeRc::Completed;
            }
            // Another structure modification owns this boundary and has
            // not finished.
            self.version.unlock_x();
            return NodeRc::NeedRetry;
        }
        if !self.ensure_space(sep_key.len() + size_of::<*mut Node>()) {
            return NodeRc::NeedSplit;
        }
        let pos: usize = self.search_child_pos::<C>(sep_key);
        self.insert_record_at(pos + 1, sep_key, payload_bytes(&right_child));
        self.version.unlock_x_bump();
        NodeRc::Completed
    }

    /// Remove the separator entry `del_key` ahead of a child merge.
    ///
    /// On underflow the lock is downgraded to SIX and `NeedMerge` is
    /// returned; `AbortMerge` when the boundary is not deletable here
    /// (leftmost/implicit); `NeedRetry` when the separator has not been
    /// published yet (an unfinished split).
    pub(crate) fn delete_child<C: KeyComparator>(&self, del_key: &[u8]) -> NodeRc {
        debug_assert!(self.version.is_locked_x());
        debug_assert!(self.is_inner());
        let pos: usize = self.search_child_pos::<C>(del_key);
        if pos == 0 {
            // The right child of the merge is this parent's leftmost
            // child; its separator lives in an ancestor and the merge
            // would cross parents.
            self.version.unlock_x();
            return NodeRc::AbortMerge;
        }
        let m: Meta = self.meta_at(pos);
        if C::compare(self.key_at(m), del_key) != KeyOrdering::Equal {
            self.version.unlock_x();
            return NodeRc::NeedRetry;
        }
        self.remove_record_at(pos);
        if self.live_size() < MIN_USED_SPACE {
            self.version.downgrade_x_to_six_bump();
            NodeRc::NeedMerge
        } else {
            self.version.unlock_x_bump();
            NodeRc::Completed
        }
    }

    /// Turn record 0's key into the implicit minus-infinity separator by
    /// zeroing its length. Build-time only (left-border nodes).
    pub(crate) fn clear_first_key(&self) {
        debug_assert!(self.is_inner());
        debug_assert!(self.record_count() > 0);
        let m: Meta = self.meta_at(0);
        if m.key_len() == 0 {
            return;
        }
        self.set_meta(
            0,
            Meta::new(m.offset() + m.key_len(), 0, m.payload_len()),
        );
        self.bury_bytes(m.key_len());
    }

    /// Physically remove record `pos`, shifting later entries left.
    fn remove_record_at(&self, pos: usize) {
        let count: usize = self.record_count();
        debug_assert!(pos < count);
        let m: Meta = self.meta_at(pos);
        for i in pos..count - 1 {
            self.set_meta(i, self.meta_at(i + 1));
        }
        self.record_count.store((count - 1) as u16, WRITE_ORD);
        self.bury_bytes(m.record_len());
    }

    // ========================================================================
    //  Structure modifications (caller holds X on self)
    // ========================================================================

    /// Move the upper half of the records into `right` and link it into
    /// the sibling chain. Both nodes stay exclusively locked; tombstones
    /// are dropped on both sides.
    ///
    /// # Safety
    ///
    /// `right` must be a freshly initialized, exclusively locked node not
    /// yet visible to any other thread.
    pub(crate) unsafe fn split(&self, right: *mut Node) {
        let live: Vec<Meta> = self.live_metas();
        debug_assert!(live.len() >= 2, "split of a node with <2 live records");

        let total: usize = live.iter().map(|m| META_LEN + m.record_len()).sum();
        let mut moved: usize = 0;
        let mut split_idx: usize = live.len();
        for (i, m) in live.iter().enumerate() {
            if moved >= total / 2 && i > 0 {
                split_idx = i;
                break;
            }
            moved += META_LEN + m.record_len();
        }
        debug_assert!(split_idx < live.len());

        // SAFETY: right is ours alone per the caller's contract.
        let r: &Node = unsafe { &*right };
        for m in &live[split_idx..] {
            // SAFETY: in-bounds payload range per the metadata invariant.
            let pay: &[u8] = unsafe {
                slice::from_raw_parts(
                    self.data_ptr().add(m.offset() + m.key_len()),
                    m.payload_len(),
                )
            };
            r.append_record(self.key_at(*m), pay);
        }
        if let Some(high) = self.high_key_owned() {
            r.set_high_key(&high);
        }

        // The first key moved right becomes this node's high key.
        let sep_key: Vec<u8> = self.key_at(live[split_idx]).to_vec();
        let left_live: Vec<Meta> = live[..split_idx].to_vec();
        self.rebuild(&left_live, Some(&sep_key));

        // Publish sibling links: right is reachable through self.next
        // from now on, which is safe because readers revalidate through
        // high-key checks.
        let old_next: *mut Node = self.next();
        r.set_next(old_next);
        r.set_prev(self as *const Node as *mut Node);
        if !old_next.is_null() {
            // SAFETY: old_next is live; prev is advisory and updated with
            // a single atomic store.
            unsafe { (*old_next).set_prev(right) };
        }
        self.set_next(right);
    }

    /// Choose the post-split owner of `key` among `left`/`right`, release
    /// the other side, and return the owner (still exclusively locked).
    ///
    /// # Safety
    ///
    /// Both nodes must be exclusively locked by the caller.
    pub(crate) unsafe fn valid_split_node<C: KeyComparator>(
        key: &[u8],
        left: *mut Node,
        right: *mut Node,
    ) -> *mut Node {
        // SAFETY: both locked by us per the caller's contract.
        let (l, r): (&Node, &Node) = unsafe { (&*left, &*right) };
        if l.covers::<C>(key) {
            r.version.unlock_x_bump();
            left
        } else {
            l.version.unlock_x_bump();
            right
        }
    }

    /// Find a right sibling this node can merge with, acquiring SIX on it.
    ///
    /// Returns null when no sibling is mergeable; in that case the SIX
    /// lock on `self` has been released and the merge is over.
    ///
    /// # Safety
    ///
    /// Caller holds SIX on `self`.
    pub(crate) unsafe fn mergeable_right_sibling(&self) -> *mut Node {
        let right: *mut Node = self.next();
        if right.is_null() {
            self.version.unlock_six();
            return ptr::null_mut();
        }
        // SAFETY: next is stable while we hold SIX (relinking requires X),
        // and the sibling cannot be retired out from under us (absorbing
        // it requires X on self).
        let r: &Node = unsafe { &*right };
        if !r.version.try_lock_six() {
            self.version.unlock_six();
            return ptr::null_mut();
        }
        if self.live_size() + r.live_size() > MERGE_LIMIT {
            r.version.unlock_six();
            self.version.unlock_six();
            return ptr::null_mut();
        }
        right
    }

    /// Absorb `right` into this node and bypass it in the sibling chain.
    ///
    /// # Safety
    ///
    /// Caller holds X on both nodes; `right` must be `self.next()`.
    pub(crate) unsafe fn merge_right(&self, right: *mut Node) {
        debug_assert!(self.version.is_locked_x());
        debug_assert_eq!(self.next(), right);
        // SAFETY: right is locked by us per the caller's contract.
        let r: &Node = unsafe { &*right };

        // Consolidate self, then append the sibling's live records.
        let high: Option<Vec<u8>> = r.high_key_owned();
        self.rebuild(&self.live_metas(), None);
        for m in r.live_metas() {
            // SAFETY: in-bounds payload range per the metadata invariant.
            let pay: &[u8] = unsafe {
                slice::from_raw_parts(r.data_ptr().add(m.offset() + m.key_len()), m.payload_len())
            };
            self.append_record(r.key_at(m), pay);
        }
        match high {
            Some(h) => self.set_high_key(&h),
            None => self.clear_high_key(),
        }

        let new_next: *mut Node = r.next();
        self.set_next(new_next);
        if !new_next.is_null() {
            // SAFETY: new_next is live; prev is advisory.
            unsafe { (*new_next).set_prev(self as *const Node as *mut Node) };
        }

        // The sibling keeps its contents for in-flight readers; the
        // removed flag sends late arrivals back to the root.
        r.mark_removed();
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::PageSource;
    use crate::key::Lexicographic;

    /// Allocate a standalone node for layout tests.
    fn make_node(source: &PageSource, is_inner: bool) -> *mut Node {
        unsafe { Node::init(source.node_page(), is_inner, false) }
    }

    fn write_one(node: &Node, key: &[u8], value: u64) -> NodeRc {
        node.version().lock_x();
        node.write::<Lexicographic>(key, payload_bytes(&value))
    }

    fn read_one(node: *mut Node, key: &[u8]) -> Option<u64> {
        unsafe { Node::read::<Lexicographic, u64>(node, key).unwrap().0 }
    }

    #[test]
    fn test_header_geometry() {
        assert_eq!(size_of::<Node>(), PAGE_SIZE);
        assert_eq!(NODE_HEADER_LEN + DATA_CAP, PAGE_SIZE);
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        assert_eq!(write_one(n, b"bravo", 2), NodeRc::Completed);
        assert_eq!(write_one(n, b"alpha", 1), NodeRc::Completed);
        assert_eq!(write_one(n, b"charlie", 3), NodeRc::Completed);

        assert_eq!(read_one(node, b"alpha"), Some(1));
        assert_eq!(read_one(node, b"bravo"), Some(2));
        assert_eq!(read_one(node, b"charlie"), Some(3));
        assert_eq!(read_one(node, b"delta"), None);

        // Keys must be in sorted directory order.
        assert_eq!(n.key_owned(0), b"alpha");
        assert_eq!(n.key_owned(1), b"bravo");
        assert_eq!(n.key_owned(2), b"charlie");

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        write_one(n, b"k", 1);
        let count_before: usize = n.record_count();
        write_one(n, b"k", 2);

        assert_eq!(n.record_count(), count_before);
        assert_eq!(read_one(node, b"k"), Some(2));

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_delete_tombstones_and_revive() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        write_one(n, b"k", 7);
        n.version().lock_x();
        // A near-empty leaf underflows by definition; accept either code.
        let rc: NodeRc = n.delete::<Lexicographic>(b"k");
        if rc == NodeRc::NeedMerge {
            n.version().unlock_six();
        }
        assert_eq!(read_one(node, b"k"), None);
        // The directory entry remains as a tombstone.
        assert_eq!(n.record_count(), 1);
        assert!(n.meta_at(0).is_deleted());

        // Re-inserting the key revives the tombstone in place.
        n.version().lock_x();
        let (rc, _ver, existing) = n.insert::<Lexicographic, u64>(b"k", payload_bytes(&9u64));
        assert_eq!(rc, NodeRc::Completed);
        assert!(existing.is_none());
        assert_eq!(read_one(node, b"k"), Some(9));
        assert_eq!(n.deleted_size(), 0);

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_delete_missing_key() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        n.version().lock_x();
        assert_eq!(n.delete::<Lexicographic>(b"ghost"), NodeRc::KeyNotInserted);
        assert!(!n.version().is_locked_x());

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_insert_reports_existing_payload() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        write_one(n, b"seven", 70);

        n.version().lock_x();
        let (rc, _ver, existing) = n.insert::<Lexicographic, u64>(b"seven", payload_bytes(&77u64));
        assert_eq!(rc, NodeRc::KeyAlreadyInserted);
        assert_eq!(existing, Some(70));
        assert_eq!(read_one(node, b"seven"), Some(70));

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_fill_until_need_split() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        let mut filled: usize = 0;
        loop {
            let key: Vec<u8> = format!("key-{filled:06}").into_bytes();
            match write_one(n, &key, filled as u64) {
                NodeRc::Completed => filled += 1,
                NodeRc::NeedSplit => {
                    n.version().unlock_x();
                    break;
                }
                rc => panic!("unexpected rc {rc:?}"),
            }
        }
        assert!(filled > 100, "page should hold >100 small records");
        assert!(n.free_space() < MIN_FREE_SPACE + 24 + META_LEN);

        unsafe { source.release(node.cast()) };
    }

    #[test]
    fn test_split_partitions_records() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        for i in 0..100u64 {
            let key: Vec<u8> = format!("key-{i:06}").into_bytes();
            write_one(n, &key, i);
        }

        n.version().lock_x();
        let right: *mut Node = unsafe { Node::init(source.node_page(), false, true) };
        unsafe { n.split(right) };
        let r: &Node = unsafe { &*right };

        // Roughly even partition.
        assert!(n.record_count() > 30 && r.record_count() > 30);
        assert_eq!(n.record_count() + r.record_count(), 100);

        // Boundary invariants: high(L) == first key of R; L.next == R.
        assert_eq!(n.high_key_owned().as_deref(), Some(&r.key_owned(0)[..]));
        assert_eq!(n.next(), right);
        assert_eq!(r.prev(), node);
        assert!(r.high_key_owned().is_none());

        // Every key still readable on the correct side.
        n.version().unlock_x_bump();
        r.version().unlock_x_bump();
        for i in 0..100u64 {
            let key: Vec<u8> = format!("key-{i:06}").into_bytes();
            assert_eq!(read_one(node, &key), Some(i), "key {i} lost by split");
        }

        unsafe {
            source.release(right.cast());
            source.release(node.cast());
        }
    }

    #[test]
    fn test_merge_absorbs_right_sibling() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        for i in 0..60u64 {
            let key: Vec<u8> = format!("key-{i:06}").into_bytes();
            write_one(n, &key, i);
        }
        n.version().lock_x();
        let right: *mut Node = unsafe { Node::init(source.node_page(), false, true) };
        unsafe { n.split(right) };
        let r: &Node = unsafe { &*right };

        // Merge the pair straight back.
        unsafe { n.merge_right(right) };
        assert_eq!(n.record_count(), 60);
        assert!(n.high_key_owned().is_none());
        assert!(n.next().is_null());
        assert!(r.is_removed());

        n.version().unlock_x_bump();
        r.version().unlock_x_bump();
        for i in 0..60u64 {
            let key: Vec<u8> = format!("key-{i:06}").into_bytes();
            assert_eq!(read_one(node, &key), Some(i), "key {i} lost by merge");
        }

        unsafe {
            source.release(right.cast());
            source.release(node.cast());
        }
    }

    #[test]
    fn test_inner_child_routing() {
        let source = PageSource::new();
        let inner: *mut Node = make_node(&source, true);
        let n: &Node = unsafe { &*inner };

        let c0: *mut Node = make_node(&source, false);
        let c1: *mut Node = make_node(&source, false);
        let c2: *mut Node = make_node(&source, false);
        n.append_record(b"", payload_bytes(&c0));
        n.append_record(b"m", payload_bytes(&c1));
        n.append_record(b"t", payload_bytes(&c2));

        assert_eq!(n.search_child_pos::<Lexicographic>(b"a"), 0);
        assert_eq!(n.search_child_pos::<Lexicographic>(b"m"), 1);
        assert_eq!(n.search_child_pos::<Lexicographic>(b"q"), 1);
        assert_eq!(n.search_child_pos::<Lexicographic>(b"t"), 2);
        assert_eq!(n.search_child_pos::<Lexicographic>(b"z"), 2);
        assert_eq!(n.child_at(1), c1);

        unsafe {
            source.release(c0.cast());
            source.release(c1.cast());
            source.release(c2.cast());
            source.release(inner.cast());
        }
    }

    #[test]
    fn test_insert_child_and_delete_child() {
        let source = PageSource::new();
        let inner: *mut Node = make_node(&source, true);
        let n: &Node = unsafe { &*inner };

        let c0: *mut Node = make_node(&source, false);
        let c1: *mut Node = make_node(&source, false);
        n.append_record(b"", payload_bytes(&c0));

        n.version().lock_x();
        assert_eq!(
            n.insert_child::<Lexicographic>(c1, b"split-key"),
            NodeRc::Completed
        );
        assert_eq!(n.record_count(), 2);
        assert_eq!(n.child_at(1), c1);

        // Re-inserting the same boundary is idempotent.
        n.version().lock_x();
        assert_eq!(
            n.insert_child::<Lexicographic>(c1, b"split-key"),
            NodeRc::Completed
        );
        assert_eq!(n.record_count(), 2);

        // A different child on the same boundary signals an unfinished
        // counterpart modification.
        let c2: *mut Node = make_node(&source, false);
        n.version().lock_x();
        assert_eq!(
            n.insert_child::<Lexicographic>(c2, b"split-key"),
            NodeRc::NeedRetry
        );

        // Deleting an unknown separator (routed past the last known one)
        // asks the caller to wait for the split that will publish it.
        n.version().lock_x();
        assert_eq!(
            n.delete_child::<Lexicographic>(b"split-key-and-more"),
            NodeRc::NeedRetry
        );

        // Deleting the known separator underflows this tiny parent.
        n.version().lock_x();
        assert_eq!(
            n.delete_child::<Lexicographic>(b"split-key"),
            NodeRc::NeedMerge
        );
        n.version().unlock_six();
        assert_eq!(n.record_count(), 1);

        // A merge crossing the leftmost boundary aborts.
        n.version().lock_x();
        assert_eq!(
            n.delete_child::<Lexicographic>(b"before-everything"),
            NodeRc::AbortMerge
        );

        unsafe {
            source.release(c0.cast());
            source.release(c1.cast());
            source.release(c2.cast());
            source.release(inner.cast());
        }
    }

    #[test]
    fn test_check_key_range_walks_right() {
        let source = PageSource::new();
        let left: *mut Node = make_node(&source, false);
        let l: &Node = unsafe { &*left };

        for i in 0..80u64 {
            let key: Vec<u8> = format!("key-{i:06}").into_bytes();
            write_one(l, &key, i);
        }
        l.version().lock_x();
        let right: *mut Node = unsafe { Node::init(source.node_page(), false, true) };
        unsafe { l.split(right) };
        l.version().unlock_x_bump();
        unsafe { (*right).version().unlock_x_bump() };

        // A key in the right half must be found by walking from the left.
        let probe: Vec<u8> = format!("key-{:06}", 79).into_bytes();
        let owner: *mut Node =
            unsafe { Node::check_key_range_and_lock_for_write::<Lexicographic>(left, &probe) }
                .unwrap();
        assert_eq!(owner, right);
        unsafe { (*owner).version().unlock_x() };

        unsafe {
            source.release(right.cast());
            source.release(left.cast());
        }
    }

    #[test]
    fn test_scan_positions() {
        let source = PageSource::new();
        let node: *mut Node = make_node(&source, false);
        let n: &Node = unsafe { &*node };

        for i in [10u64, 20, 30, 40] {
            let key: Vec<u8> = format!("k{i:03}").into_bytes();
            write_one(n, &key, i);
        }

        assert_eq!(n.search_begin_position::<Lexicographic>(None), 0);
        assert_eq!(
            n.search_begin_position::<Lexicographic>(Some((b"k020".as_slice(), true))),
            1
        );
        assert_eq!(
            n.search_begin_position::<Lexicographic>(Some((b"k020".as_slice(), false))),
            2
        );
        assert_eq!(
            n.search_begin_position::<Lexicographic>(Some((b"k025".as_slice(), true))),
            2
        );

        // Rightmost node: unbounded scan terminates here.
        assert_eq!(n.search_end_position::<Lexicographic>(None), (true, 4));
        assert_eq!(
            n.search_end_position::<Lexicographic>(Some((b"k030".as_slice(), true))),
            (true, 3)
        );
        assert_eq!(
            n.search_end_position::<Lexicographic>(Some((b"k030".as_slice(), false))),
            (true, 2)
        );

        unsafe { source.release(node.cast()) };
    }
}
