//! Bottom-up bulk construction.
//!
//! Bulkload packs a sorted entry sequence into leaves, then builds inner
//! layers over them until a single root remains. The multi-threaded path
//! splits the input into contiguous ranges, builds one partial tree per
//! worker, pads shorter partial trees with extra top layers until all
//! heights match, stitches the border nodes of adjacent partial trees at
//! every level, and reduces the concatenated top layer to one root.
//!
//! Precondition: the input is strictly increasing under the tree's
//! comparator and no concurrent operation is running. The tree must be
//! empty.

use std::cmp::Ordering as KeyOrdering;
use std::ptr;
use std::thread;

use crate::consts::{MAX_KEY_LEN, META_LEN, MIN_FREE_SPACE};
use crate::error::IndexError;
use crate::key::KeyComparator;
use crate::node::{MIN_BLOCK_SIZE, Node, payload_bytes};
use crate::ordering::CAS_SUCCESS;
use crate::tree::{BlinkTree, Payload};

/// Rough inner-node fan-out, used only to decide when a partial tree's
/// top layer is small enough to stop growing it.
const INNER_CAP_HINT: usize = (MIN_BLOCK_SIZE - MIN_FREE_SPACE) / 48;

/// A constructed node and the lowest key of its subtree (its separator
/// in the layer above).
struct NodeEntry {
    key: Vec<u8>,
    node: *mut Node,
}

// SAFETY: entries are handed between bulkload workers and the
// coordinator; the nodes they point at are not yet published to any
// other thread.
unsafe impl Send for NodeEntry {}

impl<V: Payload, C: KeyComparator> BlinkTree<V, C> {
    /// Bulk-build the tree from strictly increasing `entries` using up to
    /// `worker_count` threads.
    ///
    /// Must run before any concurrent operation, on an empty tree.
    ///
    /// # Errors
    ///
    /// Infallible today; the `Result` mirrors the other mutating
    /// operations.
    pub fn bulkload<K>(
        &self,
        entries: &[(K, V)],
        worker_count: usize,
    ) -> Result<(), IndexError<V>>
    where
        K: AsRef<[u8]> + Sync,
    {
        if entries.is_empty() {
            return Ok(());
        }
        debug_assert!(
            entries
                .windows(2)
                .all(|w| C::compare(w[0].0.as_ref(), w[1].0.as_ref()) == KeyOrdering::Less),
            "bulkload input must be strictly increasing"
        );

        let mut nodes: Vec<NodeEntry> = if worker_count <= 1 || entries.len() < worker_count {
            self.bulkload_partial(entries).1
        } else {
            let workers: usize = worker_count;
            let results: Vec<(usize, Vec<NodeEntry>)> = thread::scope(|s| {
                let mut handles = Vec::with_capacity(workers);
                let mut start: usize = 0;
                for i in 0..workers {
                    let len: usize = (entries.len() + i) / workers;
                    let range: &[(K, V)] = &entries[start..start + len];
                    start += len;
                    handles.push(s.spawn(move || self.bulkload_partial(range)));
                }
                handles
                    .into_iter()
                    .map(|h| h.join().expect("bulkload worker panicked"))
                    .collect()
            });

            // Align partial-tree heights, then concatenate the top layers
            // in input order, stitching border nodes between neighbors.
            let height: usize = results.iter().map(|(h, _)| *h).max().unwrap_or(1);
            let mut all: Vec<NodeEntry> = Vec::with_capacity(INNER_CAP_HINT * workers);
            let mut prev_top: *mut Node = ptr::null_mut();
            for (mut h, mut tops) in results {
                while h < height {
                    tops = self.construct_inner_layer(&tops);
                    h += 1;
                }
                if !prev_top.is_null() {
                    // SAFETY: both partial trees are fully built and
                    // private to this call.
                    unsafe {
                        link_vertical_border(prev_top, tops.first().expect("non-empty top").node);
                    }
                }
                prev_top = tops.last().expect("non-empty top").node;
                all.extend(tops);
            }
            all
        };

        // Build upper layers until a single root remains.
        while nodes.len() > 1 {
            nodes = self.construct_inner_layer(&nodes);
        }
        let new_root: *mut Node = nodes[0].node;
        // SAFETY: the built tree is still private to this call.
        unsafe { remove_leftmost_keys(new_root) };

        let old: *mut Node = self.root.swap(new_root, CAS_SUCCESS);
        // SAFETY: precondition (empty tree, no concurrency) makes the old
        // root an unreferenced empty leaf.
        unsafe {
            debug_assert!(!(*old).is_inner() && (*old).record_count() == 0);
            self.pages.release(old.cast());
        }
        Ok(())
    }

    /// Build one partial tree bottom-up. Returns its height and the nodes
    /// of its top layer.
    fn bulkload_partial<K>(&self, entries: &[(K, V)]) -> (usize, Vec<NodeEntry>)
    where
        K: AsRef<[u8]>,
    {
        let mut nodes: Vec<NodeEntry> = self.construct_leaf_layer(entries);
        let mut height: usize = 1;
        while nodes.len() > INNER_CAP_HINT {
            nodes = self.construct_inner_layer(&nodes);
            height += 1;
        }
        (height, nodes)
    }

    /// Pack `entries` into horizontally linked leaves.
    fn construct_leaf_layer<K>(&self, entries: &[(K, V)]) -> Vec<NodeEntry>
    where
        K: AsRef<[u8]>,
    {
        let mut nodes: Vec<NodeEntry> = Vec::new();
        let mut prev: *mut Node = ptr::null_mut();
        let mut i: usize = 0;
        while i < entries.len() {
            // SAFETY: the fresh page is ours.
            let node: *mut Node = unsafe { Node::init(self.pages.node_page(), false, false) };
            let n: &Node = unsafe { &*node };
            while i < entries.len() {
                let key: &[u8] = entries[i].0.as_ref();
                assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
                let footprint: usize = key.len() + size_of::<V>() + META_LEN;
                if n.record_count() > 0
                    && n.free_space() < footprint + MIN_FREE_SPACE + MAX_KEY_LEN
                {
                    break;
                }
                n.append_record(key, payload_bytes(&entries[i].1));
                i += 1;
            }
            link_layer_sibling(prev, node, n);
            nodes.push(NodeEntry {
                key: n.key_owned(0),
                node,
            });
            prev = node;
        }
        nodes
    }

    /// Pack child entries into horizontally linked inner nodes.
    fn construct_inner_layer(&self, children: &[NodeEntry]) -> Vec<NodeEntry> {
        let mut nodes: Vec<NodeEntry> = Vec::new();
        let mut prev: *mut Node = ptr::null_mut();
        let mut i: usize = 0;
        while i < children.len() {
            // SAFETY: the fresh page is ours.
            let node: *mut Node = unsafe { Node::init(self.pages.node_page(), true, false) };
            let n: &Node = unsafe { &*node };
            while i < children.len() {
                let key: &[u8] = &children[i].key;
                let footprint: usize = key.len() + size_of::<*mut Node>() + META_LEN;
                if n.record_count() > 0
                    && n.free_space() < footprint + MIN_FREE_SPACE + MAX_KEY_LEN
                {
                    break;
                }
                n.append_record(key, payload_bytes(&children[i].node));
                i += 1;
            }
            link_layer_sibling(prev, node, n);
            nodes.push(NodeEntry {
                key: n.key_owned(0),
                node,
            });
            prev = node;
        }
        nodes
    }
}

/// Link `node` after `prev` within one layer: sibling pointers plus the
/// predecessor's high key (the new node's lowest key).
fn link_layer_sibling(prev: *mut Node, node: *mut Node, n: &Node) {
    if prev.is_null() {
        return;
    }
    // SAFETY: both nodes are private to the running bulkload.
    let p: &Node = unsafe { &*prev };
    p.set_high_key(n.key_ref(0));
    p.set_next(node);
    n.set_prev(prev);
}

/// Stitch the facing borders of two adjacent partial trees: walk the
/// right edge of the left tree and the left edge of the right tree in
/// lockstep, linking siblings and setting high keys at every level.
///
/// # Safety
///
/// Both trees must be fully built, of equal height, and private to the
/// caller.
unsafe fn link_vertical_border(left: *mut Node, right: *mut Node) {
    let mut l: *mut Node = left;
    let mut r: *mut Node = right;
    loop {
        // SAFETY: border nodes are live and private per the contract.
        let (ln, rn): (&Node, &Node) = unsafe { (&*l, &*r) };
        debug_assert_eq!(ln.is_inner(), rn.is_inner(), "partial-tree height mismatch");
        ln.set_high_key(rn.key_ref(0));
        ln.set_next(r);
        rn.set_prev(l);
        if !ln.is_inner() {
            return;
        }
        l = ln.child_at(ln.record_count() - 1);
        r = rn.child_at(0);
    }
}

/// Make the leftmost separator implicit on every level (it is never
/// stored), walking down the left border from the root.
///
/// # Safety
///
/// The tree must be private to the caller.
unsafe fn remove_leftmost_keys(root: *mut Node) {
    let mut node: *mut Node = root;
    // SAFETY: the tree is private per the contract.
    unsafe {
        while (*node).is_inner() {
            (*node).clear_first_key();
            node = (*node).child_at(0);
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::BlinkTree;
    use crate::tree::LevelStat;

    fn entries(n: u64) -> Vec<(Vec<u8>, u64)> {
        (0..n)
            .map(|i| (format!("key-{i:08}").into_bytes(), i * 10))
            .collect()
    }

    #[test]
    fn test_bulkload_empty_input() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        tree.bulkload(&Vec::<(Vec<u8>, u64)>::new(), 4).unwrap();
        assert_eq!(tree.get(b"anything"), None);
    }

    #[test]
    fn test_bulkload_single_entry() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        tree.bulkload(&entries(1), 1).unwrap();
        assert_eq!(tree.get(b"key-00000000"), Some(0));
        assert_eq!(tree.collect_statistical_data().len(), 1);
    }

    #[test]
    fn test_bulkload_single_thread_lookups() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        let input = entries(10_000);
        tree.bulkload(&input, 1).unwrap();

        for (k, v) in &input {
            assert_eq!(tree.get(k), Some(*v));
        }
        assert_eq!(tree.get(b"key-10000000"), None);
    }

    #[test]
    fn test_bulkload_multi_thread_matches_single() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        let input = entries(10_000);
        tree.bulkload(&input, 4).unwrap();

        for (k, v) in &input {
            assert_eq!(tree.get(k), Some(*v));
        }
        let scanned: Vec<u64> = tree.scan(None, None).map(|(_, v)| v).collect();
        assert_eq!(scanned.len(), 10_000);
        assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bulkload_leaves_balanced() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        tree.bulkload(&entries(20_000), 4).unwrap();

        let stats: Vec<LevelStat> = tree.collect_statistical_data();
        assert!(stats.len() >= 2);
        assert_eq!(stats[0].node_count, 1, "single root");
        // The leaf level carries all records at one depth; node counts
        // shrink strictly going up.
        for w in stats.windows(2) {
            assert!(w[0].node_count < w[1].node_count);
        }
    }

    #[test]
    fn test_bulkload_then_mutate() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        tree.bulkload(&entries(5_000), 2).unwrap();

        // The loaded tree must accept regular traffic.
        tree.write(b"key-00001234x", 99);
        assert_eq!(tree.get(b"key-00001234x"), Some(99));
        tree.delete(b"key-00000100").unwrap();
        assert_eq!(tree.get(b"key-00000100"), None);

        // A key below the whole loaded range routes through the implicit
        // leftmost separators.
        tree.write(b"aaa", 1);
        assert_eq!(tree.get(b"aaa"), Some(1));
        let first = tree.scan(None, None).next().unwrap();
        assert_eq!(first.0, b"aaa".to_vec());
    }
}
