//! Tree engine: root pointer, descent, and structure modifications.
//!
//! [`BlinkTree`] owns an atomic root pointer and a page source. Point
//! operations descend optimistically to a leaf; mutating operations also
//! collect the ancestor chain on a stack, which the split/merge protocols
//! consume. The engine guarantees:
//!
//! - every structure modification publishes right-sibling pointers before
//!   parent entries, so concurrent descents can always recover by walking
//!   the sibling chain;
//! - a node is either reachable from the root or retired to the epoch
//!   collector, never both;
//! - retries sleep a bounded interval only when an unfinished counterpart
//!   modification is in the way.

pub(crate) mod bulkload;
pub mod scan;

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::thread;

use seize::LocalGuard;

use crate::alloc::PageSource;
use crate::consts::{EXPECTED_TREE_HEIGHT, MAX_KEY_LEN, MAX_PAYLOAD_LEN, PAGE_SIZE, RETRY_WAIT};
use crate::error::{IndexError, NodeRc};
use crate::key::{KeyComparator, Lexicographic};
use crate::node::{Node, Restart, payload_bytes};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};
use crate::trace::{debug_log, trace_log};
use crate::version::previous_version;

// ============================================================================
//  Public auxiliary types
// ============================================================================

/// Fixed-length payload types storable in the tree.
///
/// Payloads are byte-copied into node pages, so they must be `Copy` and
/// carry no droppable state. The blanket impl covers every eligible type.
pub trait Payload: Copy + Send + Sync + 'static {}

impl<T: Copy + Send + Sync + 'static> Payload for T {}

/// Node identity and version information returned by point operations.
///
/// `version` is the stamp under which the operation observed (or
/// produced) the record; `snapshot` is the stamp attributable to the
/// state *before* a successful insert, and equals `version` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address-based identity of the leaf involved.
    pub node: usize,
    /// Version stamp observed by the operation.
    pub version: u64,
    /// Pre-operation snapshot stamp.
    pub snapshot: u64,
}

/// Per-level statistics returned by
/// [`BlinkTree::collect_statistical_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStat {
    /// Number of nodes on this level.
    pub node_count: usize,
    /// Live bytes (headers + directories + records).
    pub used_bytes: usize,
    /// Bytes reserved from the allocator (one page per node).
    pub reserved_bytes: usize,
}

// ============================================================================
//  BlinkTree
// ============================================================================

/// A concurrent B+tree mapping byte-slice keys to fixed-length payloads.
///
/// All operations are safe to call from any thread. See the crate docs
/// for the concurrency model.
pub struct BlinkTree<V: Payload, C: KeyComparator = Lexicographic> {
    /// Root node. Swapped by root splits and shrinks.
    root: AtomicPtr<Node>,
    /// Page allocation and reclamation domain.
    pages: PageSource,
    _marker: PhantomData<(V, fn() -> C)>,
}

impl<V: Payload, C: KeyComparator> BlinkTree<V, C> {
    /// Create an empty tree (a single empty leaf).
    #[must_use]
    pub fn new() -> Self {
        const {
            assert!(size_of::<V>() <= MAX_PAYLOAD_LEN, "payload type too large");
        }
        let pages = PageSource::new();
        // SAFETY: the fresh page is exclusively ours.
        let root: *mut Node = unsafe { Node::init(pages.node_page(), false, false) };
        Self {
            root: AtomicPtr::new(root),
            pages,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn load_root(&self) -> *mut Node {
        self.root.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn pages(&self) -> &PageSource {
        &self.pages
    }

    // ========================================================================
    //  Descent
    // ========================================================================

    /// Find the leaf that may own `key`, without locks or a stack.
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard.
    pub(crate) unsafe fn search_leaf_node(&self, key: &[u8]) -> *mut Node {
        'restart: loop {
            let mut node: *mut Node = self.load_root();
            // SAFETY: nodes reached from the root are live under the guard.
            while unsafe { (*node).is_inner() } {
                match unsafe { Node::search_child::<C>(node, key) } {
                    Ok((_owner, child)) => node = child,
                    Err(Restart) => {
                        trace_log!("descent restart (retired node)");
                        continue 'restart;
                    }
                }
            }
            return node;
        }
    }

    /// Find the leftmost leaf; used by unbounded scans.
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard.
    pub(crate) unsafe fn search_leftmost_leaf(&self) -> *mut Node {
        'restart: loop {
            let mut node: *mut Node = self.load_root();
            loop {
                // SAFETY: live under the guard.
                let n: &Node = unsafe { &*node };
                if !n.is_inner() {
                    return node;
                }
                let ver: u64 = n.version().get_version();
                if n.is_removed() {
                    continue 'restart;
                }
                let child: *mut Node = n.child_at(0);
                if n.version().validate_version(ver) {
                    node = child;
                }
            }
        }
    }

    /// Find the leaf that may own `key`, collecting the ancestor chain
    /// into `stack` (leaf on top).
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard.
    unsafe fn search_leaf_node_for_write(&self, key: &[u8], stack: &mut Vec<*mut Node>) {
        'restart: loop {
            stack.clear();
            let mut node: *mut Node = self.load_root();
            // SAFETY: live under the guard.
            while unsafe { (*node).is_inner() } {
                match unsafe { Node::search_child::<C>(node, key) } {
                    Ok((owner, child)) => {
                        stack.push(owner);
                        node = child;
                    }
                    Err(Restart) => continue 'restart,
                }
            }
            stack.push(node);
            return;
        }
    }

    /// Rebuild a valid ancestor chain for `target`, descending along
    /// `key`. On return the top of `stack` is the parent of `target`.
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard; `target` must remain reachable
    /// through the sibling chain of its level (guaranteed while the
    /// caller pins it with a lock or is completing its split).
    unsafe fn search_parent_node(&self, stack: &mut Vec<*mut Node>, key: &[u8], target: *mut Node) {
        'restart: loop {
            stack.clear();
            let mut node: *mut Node = self.load_root();
            loop {
                if node == target {
                    return;
                }
                // SAFETY: live under the guard.
                let n: &Node = unsafe { &*node };
                if n.is_inner() {
                    match unsafe { Node::search_child::<C>(node, key) } {
                        Ok((owner, child)) => {
                            if owner == target {
                                return;
                            }
                            stack.push(owner);
                            node = child;
                        }
                        Err(Restart) => continue 'restart,
                    }
                } else {
                    match unsafe { Node::check_key_range::<C>(node, key) } {
                        Ok(owner) if owner == target => return,
                        // The leaf level did not contain the target where
                        // expected; the tree moved under us.
                        _ => continue 'restart,
                    }
                }
            }
        }
    }

    // ========================================================================
    //  Point operations
    // ========================================================================

    /// Read the payload for `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.read(key).0
    }

    /// Read the payload for `key`, also returning the node identity and
    /// the version snapshot the read was validated against.
    pub fn read(&self, key: &[u8]) -> (Option<V>, NodeInfo) {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        let _guard: LocalGuard<'_> = self.pages.guard();
        loop {
            // SAFETY: guard held for the whole operation.
            let leaf: *mut Node = unsafe { self.search_leaf_node(key) };
            match unsafe { Node::read::<C, V>(leaf, key) } {
                Ok((payload, ver, node)) => {
                    let info = NodeInfo {
                        node: node as usize,
                        version: ver,
                        snapshot: ver,
                    };
                    return (payload, info);
                }
                Err(Restart) => continue,
            }
        }
    }

    /// Upsert `key -> payload`. Always succeeds.
    pub fn write(&self, key: &[u8], payload: V) {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        let guard: LocalGuard<'_> = self.pages.guard();
        let mut stack: Vec<*mut Node> = Vec::with_capacity(EXPECTED_TREE_HEIGHT);
        loop {
            // SAFETY: guard held for the whole operation.
            unsafe { self.search_leaf_node_for_write(key, &mut stack) };
            let leaf: *mut Node = *stack.last().expect("descent leaves a leaf on the stack");
            let Ok(node) = (unsafe { Node::check_key_range_and_lock_for_write::<C>(leaf, key) })
            else {
                continue;
            };
            // SAFETY: node is X-locked by us.
            match unsafe { (*node).write::<C>(key, payload_bytes(&payload)) } {
                NodeRc::Completed => return,
                NodeRc::NeedSplit => {
                    // SAFETY: node is still X-locked.
                    unsafe {
                        let right: *mut Node = self.half_split(node);
                        let sep: Vec<u8> = (*node)
                            .high_key_owned()
                            .expect("split leaves a high key behind");
                        let target: *mut Node = Node::valid_split_node::<C>(key, node, right);
                        let rc: NodeRc = (*target).write::<C>(key, payload_bytes(&payload));
                        debug_assert_eq!(rc, NodeRc::Completed, "no space after split");
                        self.complete_split(&mut stack, node, right, &sep, &guard);
                    }
                    return;
                }
                rc => unreachable!("write returned {rc:?}"),
            }
        }
    }

    /// Insert `key -> payload` iff absent.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeyExists`] with the stored payload and the version
    /// under which it was observed.
    pub fn insert(&self, key: &[u8], payload: V) -> Result<NodeInfo, IndexError<V>> {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        let guard: LocalGuard<'_> = self.pages.guard();
        let mut stack: Vec<*mut Node> = Vec::with_capacity(EXPECTED_TREE_HEIGHT);
        loop {
            // SAFETY: guard held for the whole operation.
            unsafe { self.search_leaf_node_for_write(key, &mut stack) };
            let leaf: *mut Node = *stack.last().expect("descent leaves a leaf on the stack");
            let Ok(node) = (unsafe { Node::check_key_range_and_lock_for_write::<C>(leaf, key) })
            else {
                continue;
            };
            // SAFETY: node is X-locked by us.
            let (rc, ver, existing) =
                unsafe { (*node).insert::<C, V>(key, payload_bytes(&payload)) };
            match rc {
                NodeRc::KeyAlreadyInserted => {
                    return Err(IndexError::KeyExists {
                        payload: existing.expect("existing payload accompanies KeyAlreadyInserted"),
                        info: NodeInfo {
                            node: node as usize,
                            version: ver,
                            snapshot: ver,
                        },
                    });
                }
                NodeRc::Completed => {
                    return Ok(NodeInfo {
                        node: node as usize,
                        version: ver,
                        snapshot: previous_version(ver),
                    });
                }
                NodeRc::NeedSplit => {
                    // SAFETY: node is still X-locked.
                    let info: NodeInfo = unsafe {
                        let right: *mut Node = self.half_split(node);
                        let sep: Vec<u8> = (*node)
                            .high_key_owned()
                            .expect("split leaves a high key behind");
                        let target: *mut Node = Node::valid_split_node::<C>(key, node, right);
                        let (rc, ver, _) = (*target).insert::<C, V>(key, payload_bytes(&payload));
                        debug_assert_eq!(rc, NodeRc::Completed, "no space after split");
                        self.complete_split(&mut stack, node, right, &sep, &guard);
                        NodeInfo {
                            node: target as usize,
                            version: ver,
                            snapshot: previous_version(ver),
                        }
                    };
                    return Ok(info);
                }
                rc => unreachable!("insert returned {rc:?}"),
            }
        }
    }

    /// Overwrite the payload iff `key` is present.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeyNotExist`] when no record exists for `key`.
    pub fn update(&self, key: &[u8], payload: V) -> Result<(), IndexError<V>> {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        let _guard: LocalGuard<'_> = self.pages.guard();
        loop {
            // Updates never change record sizes, so no stack is needed.
            // SAFETY: guard held for the whole operation.
            let leaf: *mut Node = unsafe { self.search_leaf_node(key) };
            let Ok(node) = (unsafe { Node::check_key_range_and_lock_for_write::<C>(leaf, key) })
            else {
                continue;
            };
            // SAFETY: node is X-locked by us.
            match unsafe { (*node).update::<C>(key, payload_bytes(&payload)) } {
                NodeRc::Completed => return Ok(()),
                NodeRc::KeyNotInserted => return Err(IndexError::KeyNotExist),
                rc => unreachable!("update returned {rc:?}"),
            }
        }
    }

    /// Delete the record iff `key` is present.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeyNotExist`] when no record exists for `key`.
    pub fn delete(&self, key: &[u8]) -> Result<(), IndexError<V>> {
        assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        let guard: LocalGuard<'_> = self.pages.guard();
        let mut stack: Vec<*mut Node> = Vec::with_capacity(EXPECTED_TREE_HEIGHT);
        loop {
            // SAFETY: guard held for the whole operation.
            unsafe { self.search_leaf_node_for_write(key, &mut stack) };
            let leaf: *mut Node = *stack.last().expect("descent leaves a leaf on the stack");
            let Ok(node) = (unsafe { Node::check_key_range_and_lock_for_write::<C>(leaf, key) })
            else {
                continue;
            };
            // SAFETY: node is X-locked by us.
            match unsafe { (*node).delete::<C>(key) } {
                NodeRc::Completed => return Ok(()),
                NodeRc::KeyNotInserted => return Err(IndexError::KeyNotExist),
                NodeRc::NeedMerge => {
                    // SAFETY: node holds SIX after the downgrade.
                    unsafe { self.merge(&mut stack, node, &guard) };
                    return Ok(());
                }
                rc => unreachable!("delete returned {rc:?}"),
            }
        }
    }

    // ========================================================================
    //  Split cascade
    // ========================================================================

    /// Allocate a right sibling and move the upper half of `node` into
    /// it. Both nodes are exclusively locked on return.
    ///
    /// # Safety
    ///
    /// Caller holds X on `node`.
    unsafe fn half_split(&self, node: *mut Node) -> *mut Node {
        // SAFETY: the fresh page is ours; split's contract is upheld by
        // initializing the right node locked and unpublished.
        unsafe {
            let right: *mut Node =
                Node::init(self.pages.node_page(), (*node).is_inner(), true);
            (*node).split(right);
            debug_log!(left = node as usize, right = right as usize, "half split");
            right
        }
    }

    /// Finish a split by inserting the separator entry into the parent,
    /// recursing when the parent itself overflows.
    ///
    /// On entry, `stack` still has `l_child` on top; both children are
    /// unlocked and the new sibling is reachable through `l_child`'s
    /// chain.
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard.
    unsafe fn complete_split(
        &self,
        stack: &mut Vec<*mut Node>,
        l_child: *mut Node,
        r_child: *mut Node,
        sep_key: &[u8],
        guard: &LocalGuard<'_>,
    ) {
        stack.pop();
        let mut node: *mut Node = ptr::null_mut();
        loop {
            if stack.is_empty() {
                // The split child was (or has become) the root.
                if self.try_root_split(l_child, r_child, sep_key) {
                    return;
                }
                // Another thread changed the root; rebuild the chain.
                // SAFETY: r_child stays reachable through l_child's chain
                // until its parent entry exists.
                unsafe { self.search_parent_node(stack, sep_key, r_child) };
                continue;
            }
            if node.is_null() {
                node = *stack.last().expect("non-empty stack");
            }

            // SAFETY: guard held; walk to the true parent and lock it.
            let owner: *mut Node =
                match unsafe { Node::check_key_range_and_lock_for_write::<C>(node, sep_key) } {
                    Ok(owner) => owner,
                    Err(Restart) => {
                        if self.try_root_split(l_child, r_child, sep_key) {
                            return;
                        }
                        // SAFETY: as above.
                        unsafe { self.search_parent_node(stack, sep_key, r_child) };
                        node = ptr::null_mut();
                        continue;
                    }
                };

            // SAFETY: owner is X-locked by us.
            match unsafe { (*owner).insert_child::<C>(r_child, sep_key) } {
                NodeRc::Completed => return,
                NodeRc::NeedSplit => {
                    // The parent is full: split it and send the pending
                    // entry to whichever half owns the separator.
                    // SAFETY: owner is still X-locked.
                    unsafe {
                        let right: *mut Node = self.half_split(owner);
                        let parent_sep: Vec<u8> = (*owner)
                            .high_key_owned()
                            .expect("split leaves a high key behind");
                        let target: *mut Node =
                            Node::valid_split_node::<C>(sep_key, owner, right);
                        let rc: NodeRc = (*target).insert_child::<C>(r_child, sep_key);
                        debug_assert_eq!(rc, NodeRc::Completed, "no space after split");
                        self.complete_split(stack, owner, right, &parent_sep, guard);
                    }
                    return;
                }
                NodeRc::NeedRetry => {
                    // An unfinished merge owns this boundary.
                    trace_log!("split completion retry");
                    thread::sleep(RETRY_WAIT);
                    node = owner;
                }
                rc => unreachable!("insert_child returned {rc:?}"),
            }
        }
    }

    /// Install a new root over a split pair. Fails when `l_child` is no
    /// longer the root.
    fn try_root_split(&self, l_child: *mut Node, r_child: *mut Node, sep_key: &[u8]) -> bool {
        let cur: *mut Node = self.root.load(RELAXED);
        if cur != l_child {
            return false;
        }
        let page = self.pages.node_page();
        // SAFETY: the fresh page is ours.
        let new_root: *mut Node = unsafe { Node::init_root(page, sep_key, l_child, r_child) };
        match self
            .root
            .compare_exchange(cur, new_root, CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => {
                debug_log!(root = new_root as usize, "root split");
                true
            }
            Err(_) => {
                // The unpublished page can be released directly.
                // SAFETY: new_root never became visible.
                unsafe { self.pages.release(page) };
                false
            }
        }
    }

    // ========================================================================
    //  Merge chain
    // ========================================================================

    /// Merge `l_child` (holding SIX after an underflow) with a right
    /// sibling, walking up the tree while parents keep underflowing.
    ///
    /// # Safety
    ///
    /// Caller holds an epoch guard; `l_child` holds SIX.
    unsafe fn merge(&self, stack: &mut Vec<*mut Node>, l_child: *mut Node, guard: &LocalGuard<'_>) {
        stack.pop();
        let mut l_child: *mut Node = l_child;
        'level: loop {
            // SAFETY: l_child holds SIX.
            let r_child: *mut Node = unsafe { (*l_child).mergeable_right_sibling() };
            if r_child.is_null() {
                // No partner; the SIX lock has been released.
                return;
            }
            let del_key: Vec<u8> = unsafe {
                (*l_child)
                    .high_key_owned()
                    .expect("a node with a right sibling has a high key")
            };

            let mut node: *mut Node = ptr::null_mut();
            loop {
                if node.is_null() {
                    if stack.is_empty() {
                        // The stale stack ran out; rebuild it for the
                        // sibling.
                        // SAFETY: r_child is pinned by our SIX lock.
                        unsafe { self.search_parent_node(stack, &del_key, r_child) };
                        if stack.is_empty() {
                            // No parent found: give up on this merge.
                            // SAFETY: both SIX locks are ours.
                            unsafe {
                                (*l_child).version().unlock_six();
                                (*r_child).version().unlock_six();
                            }
                            return;
                        }
                    }
                    node = stack.pop().expect("non-empty stack");
                }

                // SAFETY: guard held; walk to the true parent and lock it.
                let owner: *mut Node =
                    match unsafe { Node::check_key_range_and_lock_for_write::<C>(node, &del_key) } {
                        Ok(owner) => owner,
                        Err(Restart) => {
                            stack.clear();
                            node = ptr::null_mut();
                            continue;
                        }
                    };

                // SAFETY: owner is X-locked by us.
                match unsafe { (*owner).delete_child::<C>(&del_key) } {
                    NodeRc::Completed => {
                        // SAFETY: both children hold SIX.
                        unsafe { self.physical_merge(l_child, r_child, guard) };
                        return;
                    }
                    NodeRc::AbortMerge => {
                        debug_log!("merge aborted (boundary moved)");
                        // SAFETY: both SIX locks are ours.
                        unsafe {
                            (*l_child).version().unlock_six();
                            (*r_child).version().unlock_six();
                        }
                        return;
                    }
                    NodeRc::NeedRetry => {
                        // An unfinished split owns this boundary.
                        trace_log!("merge retry (separator not published)");
                        thread::sleep(RETRY_WAIT);
                        node = owner;
                    }
                    NodeRc::NeedMerge => {
                        // SAFETY: both children hold SIX; owner holds SIX
                        // after the downgrade inside delete_child.
                        unsafe { self.physical_merge(l_child, r_child, guard) };
                        if stack.is_empty() {
                            // SAFETY: owner holds SIX.
                            unsafe { self.try_shrink_tree(owner, guard) };
                            return;
                        }
                        l_child = owner;
                        continue 'level;
                    }
                    rc => unreachable!("delete_child returned {rc:?}"),
                }
            }
        }
    }

    /// Upgrade both SIX locks to X, absorb the sibling, and retire its
    /// page.
    ///
    /// # Safety
    ///
    /// Caller holds SIX on both nodes; `right` is `left`'s next sibling.
    unsafe fn physical_merge(&self, left: *mut Node, right: *mut Node, guard: &LocalGuard<'_>) {
        // Left-to-right upgrade order keeps the lock order acyclic.
        // SAFETY: SIX held on both per the caller's contract.
        unsafe {
            (*left).version().upgrade_six_to_x();
            (*right).version().upgrade_six_to_x();
            (*left).merge_right(right);
            (*left).version().unlock_x_bump();
            (*right).version().unlock_x_bump();
            debug_log!(left = left as usize, right = right as usize, "merged");
            self.pages.retire(right.cast(), guard);
        }
    }

    /// Collapse single-child roots, retiring each displaced root page.
    ///
    /// # Safety
    ///
    /// Caller holds SIX on `node` and an epoch guard.
    unsafe fn try_shrink_tree(&self, node: *mut Node, guard: &LocalGuard<'_>) {
        let mut node: *mut Node = node;
        // SAFETY: SIX held per the caller's contract.
        unsafe {
            if node == self.root.load(RELAXED) && (*node).is_inner() && (*node).record_count() == 1
            {
                loop {
                    let child: *mut Node = (*node).child_at(0);
                    // SIX-couple downward so the new root's shape stays
                    // stable until published.
                    (*child).version().lock_six();
                    (*node).version().unlock_six();
                    self.pages.retire(node.cast(), guard);
                    node = child;
                    if !((*node).is_inner() && (*node).record_count() == 1) {
                        break;
                    }
                }
                self.root.store(node, WRITE_ORD);
                debug_log!(root = node as usize, "root shrink");
            }
            (*node).version().unlock_six();
        }
    }

    // ========================================================================
    //  Statistics
    // ========================================================================

    /// Collect per-level node counts and byte usage.
    #[must_use]
    pub fn collect_statistical_data(&self) -> Vec<LevelStat> {
        let _guard: LocalGuard<'_> = self.pages.guard();
        let mut stats: Vec<LevelStat> = Vec::with_capacity(EXPECTED_TREE_HEIGHT);
        // SAFETY: guard held; the recursion locks each node shared.
        unsafe { self.collect_level(self.load_root(), 0, &mut stats) };
        stats
    }

    /// # Safety
    ///
    /// Caller holds an epoch guard; `node` must be live.
    unsafe fn collect_level(&self, node: *mut Node, level: usize, out: &mut Vec<LevelStat>) {
        // SAFETY: live per the caller's contract.
        let n: &Node = unsafe { &*node };
        n.version().lock_s();

        if out.len() <= level {
            out.push(LevelStat::default());
        }
        let slot: &mut LevelStat = &mut out[level];
        slot.node_count += 1;
        slot.used_bytes += n.node_usage();
        slot.reserved_bytes += PAGE_SIZE;

        if n.is_inner() {
            for i in 0..n.record_count() {
                // SAFETY: children of an S-locked inner node are live.
                unsafe { self.collect_level(n.child_at(i), level + 1, out) };
            }
        }
        n.version().unlock_s();
    }

    // ========================================================================
    //  Teardown
    // ========================================================================

    /// # Safety
    ///
    /// Exclusive access (no concurrent operations).
    unsafe fn delete_children(&self, node: *mut Node) {
        // SAFETY: exclusive access per the caller's contract.
        unsafe {
            if (*node).is_inner() {
                for i in 0..(*node).record_count() {
                    self.delete_children((*node).child_at(i));
                }
            }
            self.pages.release(node.cast());
        }
    }
}

impl<V: Payload, C: KeyComparator> Default for BlinkTree<V, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Payload, C: KeyComparator> Drop for BlinkTree<V, C> {
    fn drop(&mut self) {
        // `&mut self` guarantees no other thread is active; pages go back
        // to the allocator directly, bypassing the reclamation protocol.
        let root: *mut Node = *self.root.get_mut();
        // SAFETY: exclusive access.
        unsafe { self.delete_children(root) };
    }
}

impl<V: Payload, C: KeyComparator> std::fmt::Debug for BlinkTree<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkTree")
            .field("root", &self.root.load(RELAXED))
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================
