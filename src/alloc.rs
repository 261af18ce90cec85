//! Page allocation and epoch-based reclamation.
//!
//! Every node lives in one fixed-size [`Page`]. Pages are handed out by
//! [`PageSource`], which first polls a pool of previously retired pages
//! (now safe to reuse) and falls back to the global allocator.
//!
//! Retirement goes through a [`seize::Collector`]: a page evicted by a
//! merge or root shrink is deferred until every guard that was active at
//! retirement time has ended, then recycled into the pool. Reclamation
//! callbacks are plain function pointers, so the pool is a process-wide
//! bounded free list rather than per-tree state; a page is raw memory and
//! carries no tree identity, which makes cross-tree reuse harmless.

use parking_lot::Mutex;
use seize::{Collector, Guard, LocalGuard};

use crate::consts::{PAGE_POOL_CAP, PAGE_SIZE};

// ============================================================================
//  Page
// ============================================================================

/// A fixed-size, cache-line-aligned memory region holding one node.
#[repr(C, align(64))]
pub(crate) struct Page {
    bytes: [u8; PAGE_SIZE],
}

const _: () = assert!(size_of::<Page>() == PAGE_SIZE);

/// Send-able wrapper for pooled page pointers.
struct PooledPage(*mut Page);

// SAFETY: A pooled page is unreachable from any tree; the pointer is only
// a handle to raw memory owned by the pool.
unsafe impl Send for PooledPage {}

/// Retired pages whose reclamation epoch has expired, ready for reuse.
static RETIRED_POOL: Mutex<Vec<PooledPage>> = Mutex::new(Vec::new());

/// Reclamation callback: recycle an expired page into the pool, or free
/// it when the pool is full.
///
/// # Safety
///
/// `ptr` must have been allocated by [`PageSource::node_page`] and must be
/// unreachable from any tree. Seize guarantees no reader still holds a
/// reference.
unsafe fn recycle_page(ptr: *mut Page, _collector: &Collector) {
    let mut pool = RETIRED_POOL.lock();
    if pool.len() < PAGE_POOL_CAP {
        pool.push(PooledPage(ptr));
        return;
    }
    drop(pool);
    // SAFETY: ptr came from Box::into_raw in node_page and is unreachable.
    unsafe { drop(Box::from_raw(ptr)) };
}

// ============================================================================
//  PageSource
// ============================================================================

/// Per-tree page source and reclamation domain.
pub(crate) struct PageSource {
    collector: Collector,
}

impl PageSource {
    /// Create a new source with its own collector.
    pub(crate) fn new() -> Self {
        Self {
            collector: Collector::new(),
        }
    }

    /// Enter an epoch guard. Every public tree operation scopes itself
    /// inside one of these.
    #[inline]
    pub(crate) fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Allocate or reuse a memory region for a node page.
    ///
    /// The returned page is zeroed when fresh; reused pages carry stale
    /// bytes and must be fully initialized by the caller before being
    /// published.
    pub(crate) fn node_page(&self) -> *mut Page {
        if let Some(PooledPage(ptr)) = RETIRED_POOL.lock().pop() {
            return ptr;
        }
        let page: Box<Page> = unsafe { Box::new_zeroed().assume_init() };
        Box::into_raw(page)
    }

    /// Retire a page that has been unlinked from the tree.
    ///
    /// # Safety
    ///
    /// - `page` must have come from [`Self::node_page`].
    /// - No new traversal may be able to reach the page; in-flight
    ///   traversals must detect retirement via the version protocol.
    pub(crate) unsafe fn retire(&self, page: *mut Page, guard: &LocalGuard<'_>) {
        // SAFETY: forwarded caller contract; seize defers the callback
        // until all guards active at this point have ended.
        unsafe { guard.defer_retire(page, recycle_page) };
    }

    /// Release a page directly, bypassing the reclamation protocol.
    ///
    /// # Safety
    ///
    /// Only valid while no other thread can observe the page — i.e. from
    /// the tree destructor, which holds `&mut self`.
    pub(crate) unsafe fn release(&self, page: *mut Page) {
        // SAFETY: caller guarantees exclusive access; the page came from
        // node_page (Box::into_raw).
        unsafe { drop(Box::from_raw(page)) };
    }
}

impl std::fmt::Debug for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSource").finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_page_returns_distinct_pages() {
        let source = PageSource::new();
        let a: *mut Page = source.node_page();
        let b: *mut Page = source.node_page();

        assert!(!a.is_null());
        assert!(!b.is_null());
        assert_ne!(a, b);

        unsafe {
            source.release(a);
            source.release(b);
        }
    }

    #[test]
    fn test_retire_defers_until_guard_ends() {
        let source = PageSource::new();
        let page: *mut Page = source.node_page();

        {
            let guard = source.guard();
            // SAFETY: page is unreachable (never published anywhere).
            unsafe { source.retire(page, &guard) };
            // The page must not be handed back while this guard is live;
            // we cannot observe the pool deterministically here, but the
            // call must not free the memory out from under the guard.
        }
    }

    #[test]
    fn test_pooled_reuse_roundtrip() {
        // Drain the shared pool first so the assertion below is about the
        // page we push.
        while RETIRED_POOL.lock().pop().is_some() {}

        let source = PageSource::new();
        let page: *mut Page = source.node_page();
        RETIRED_POOL.lock().push(PooledPage(page));

        let reused: *mut Page = source.node_page();
        assert_eq!(reused, page);

        unsafe { source.release(reused) };
    }
}
