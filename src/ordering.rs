//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering usage consistent across the codebase and
//! make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading node fields during optimistic traversal.
/// Pairs with writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for writing node fields under lock.
/// Pairs with reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success (lock transitions, root swap).
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure. Only need to see the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for loads within a locked region.
/// Safe because the lock provides synchronization.
pub const RELAXED: Ordering = Ordering::Relaxed;
