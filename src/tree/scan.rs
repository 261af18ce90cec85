//! Range scans over the leaf chain.
//!
//! A [`RangeScanner`] walks the doubly linked leaf level between two
//! optional bounds. It holds a shared lock on exactly one leaf at a time,
//! coupling to the next leaf before releasing the current one, and keeps
//! its epoch guard alive for the whole scan so that leaves retired by
//! concurrent merges stay readable until the scan ends.
//!
//! Tombstoned records are skipped; the end bound is re-evaluated in every
//! leaf the scan enters.

use std::marker::PhantomData;

use seize::LocalGuard;

use crate::consts::MAX_KEY_LEN;
use crate::key::KeyComparator;
use crate::node::Node;
use crate::tree::{BlinkTree, Payload};

impl<V: Payload, C: KeyComparator> BlinkTree<V, C> {
    /// Scan records between `begin` and `end`.
    ///
    /// Each bound is an optional `(key, inclusive)` pair; an absent bound
    /// leaves that side of the range open.
    #[must_use]
    pub fn scan(
        &self,
        begin: Option<(&[u8], bool)>,
        end: Option<(&[u8], bool)>,
    ) -> RangeScanner<'_, V, C> {
        if let Some((key, _)) = begin {
            assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        }
        if let Some((key, _)) = end {
            assert!(key.len() <= MAX_KEY_LEN, "key exceeds MAX_KEY_LEN");
        }
        let guard: LocalGuard<'_> = self.pages().guard();
        loop {
            // SAFETY: the guard is held and outlives the scanner.
            let start: *mut Node = match begin {
                Some((key, _)) => unsafe { self.search_leaf_node(key) },
                None => unsafe { self.search_leftmost_leaf() },
            };
            let Ok(node) =
                (unsafe { Node::lock_s_for_range::<C>(start, begin.map(|(key, _)| key)) })
            else {
                continue;
            };
            // SAFETY: node is S-locked by us.
            let (pos, (is_end, end_pos)) = unsafe {
                (
                    (*node).search_begin_position::<C>(begin),
                    (*node).search_end_position::<C>(end),
                )
            };
            return RangeScanner {
                _guard: guard,
                node,
                pos,
                end_pos,
                is_end,
                end_key: end.map(|(key, inclusive)| (key.to_vec(), inclusive)),
                _marker: PhantomData,
            };
        }
    }
}

// ============================================================================
//  RangeScanner
// ============================================================================

/// Cursor over the records in a key range.
///
/// Besides the [`Iterator`] facade (which copies keys out), the scanner
/// exposes [`key`](Self::key)/[`payload`](Self::payload) accessors that
/// borrow the current record in place.
pub struct RangeScanner<'t, V: Payload, C: KeyComparator> {
    /// Epoch guard pinned for the scan's lifetime.
    _guard: LocalGuard<'t>,
    /// Current leaf (S-locked), or null once exhausted.
    node: *mut Node,
    /// Position of the cursor within the current leaf.
    pos: usize,
    /// End position of the range within the current leaf.
    end_pos: usize,
    /// Whether the current leaf is the last one in range.
    is_end: bool,
    /// The user-supplied end bound.
    end_key: Option<(Vec<u8>, bool)>,
    _marker: PhantomData<(V, fn() -> C)>,
}

impl<V: Payload, C: KeyComparator> RangeScanner<'_, V, C> {
    /// Check whether the cursor points at a record inside the range,
    /// lazily crossing leaf boundaries.
    ///
    /// Returns `false` exactly once the range is exhausted; the shared
    /// lock on the terminal leaf is released at that point.
    pub fn has_next(&mut self) -> bool {
        if self.node.is_null() {
            return false;
        }
        loop {
            // SAFETY: self.node is S-locked by this scanner.
            let n: &Node = unsafe { &*self.node };

            // Skip tombstones.
            while self.pos < self.end_pos && n.meta_at(self.pos).is_deleted() {
                self.pos += 1;
            }
            if self.pos < self.end_pos {
                return true;
            }

            if self.is_end {
                n.version().unlock_s();
                self.node = std::ptr::null_mut();
                return false;
            }

            // Couple to the next leaf and re-evaluate the end bound.
            // SAFETY: not the terminal leaf, so a next sibling exists.
            let next: *mut Node = unsafe { n.next_for_read() };
            self.node = next;
            self.pos = 0;
            // SAFETY: next is S-locked by us now.
            let (is_end, end_pos) = unsafe {
                (*next).search_end_position::<C>(
                    self.end_key.as_ref().map(|(key, inc)| (key.as_slice(), *inc)),
                )
            };
            self.is_end = is_end;
            self.end_pos = end_pos;
        }
    }

    /// The key at the cursor. Only valid after `has_next()` returned
    /// `true`.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        debug_assert!(!self.node.is_null());
        // SAFETY: the leaf is S-locked; the borrow is tied to &self.
        unsafe { (*self.node).key_ref(self.pos) }
    }

    /// The payload at the cursor. Only valid after `has_next()` returned
    /// `true`.
    #[must_use]
    pub fn payload(&self) -> V {
        debug_assert!(!self.node.is_null());
        // SAFETY: the leaf is S-locked.
        unsafe { (*self.node).payload_copy::<V>(self.pos) }
    }

    /// Advance the cursor one position within the current leaf. Boundary
    /// crossing happens lazily in [`Self::has_next`].
    pub fn advance(&mut self) {
        self.pos += 1;
    }
}

impl<V: Payload, C: KeyComparator> Iterator for RangeScanner<'_, V, C> {
    type Item = (Vec<u8>, V);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let item: (Vec<u8>, V) = (self.key().to_vec(), self.payload());
        self.advance();
        Some(item)
    }
}

impl<V: Payload, C: KeyComparator> Drop for RangeScanner<'_, V, C> {
    fn drop(&mut self) {
        // Release the shared lock if the scan was abandoned mid-leaf.
        if !self.node.is_null() {
            // SAFETY: the leaf is S-locked by this scanner.
            unsafe { (*self.node).version().unlock_s() };
        }
    }
}

impl<V: Payload, C: KeyComparator> std::fmt::Debug for RangeScanner<'_, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeScanner")
            .field("pos", &self.pos)
            .field("end_pos", &self.end_pos)
            .field("is_end", &self.is_end)
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::BlinkTree;

    fn key(i: u64) -> Vec<u8> {
        format!("key-{i:08}").into_bytes()
    }

    #[test]
    fn test_scan_empty_tree() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        assert_eq!(tree.scan(None, None).count(), 0);
    }

    #[test]
    fn test_full_scan_in_order() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..100 {
            tree.write(&key(i), i);
        }
        let items: Vec<(Vec<u8>, u64)> = tree.scan(None, None).collect();
        assert_eq!(items.len(), 100);
        for (i, (k, v)) in items.iter().enumerate() {
            assert_eq!(k, &key(i as u64));
            assert_eq!(*v, i as u64);
        }
    }

    #[test]
    fn test_bounded_scan_inclusivity() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..20 {
            tree.write(&key(i), i);
        }

        let (k5, k10) = (key(5), key(10));
        let both: Vec<u64> = tree
            .scan(Some((k5.as_slice(), true)), Some((k10.as_slice(), true)))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(both, vec![5, 6, 7, 8, 9, 10]);

        let open: Vec<u64> = tree
            .scan(Some((k5.as_slice(), false)), Some((k10.as_slice(), false)))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(open, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_scan_begin_equals_end() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..10 {
            tree.write(&key(i), i);
        }
        let k4 = key(4);
        let exact: Vec<u64> = tree
            .scan(Some((k4.as_slice(), true)), Some((k4.as_slice(), true)))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(exact, vec![4]);

        let empty: Vec<u64> = tree
            .scan(Some((k4.as_slice(), false)), Some((k4.as_slice(), false)))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(empty, Vec::<u64>::new());
    }

    #[test]
    fn test_scan_skips_deleted() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..10 {
            tree.write(&key(i), i);
        }
        tree.delete(&key(3)).unwrap();
        tree.delete(&key(7)).unwrap();

        let vals: Vec<u64> = tree.scan(None, None).map(|(_, v)| v).collect();
        assert_eq!(vals, vec![0, 1, 2, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn test_scan_crosses_leaf_boundaries() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        let n: u64 = 2_000; // several leaves
        for i in 0..n {
            tree.write(&key(i), i);
        }
        let vals: Vec<u64> = tree.scan(None, None).map(|(_, v)| v).collect();
        assert_eq!(vals.len(), n as usize);
        assert!(vals.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_scanner_accessor_api() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..5 {
            tree.write(&key(i), i * 10);
        }
        let mut scanner = tree.scan(None, None);
        let mut seen: Vec<(Vec<u8>, u64)> = Vec::new();
        while scanner.has_next() {
            seen.push((scanner.key().to_vec(), scanner.payload()));
            scanner.advance();
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[2], (key(2), 20));
    }

    #[test]
    fn test_abandoned_scan_releases_lock() {
        let tree: BlinkTree<u64> = BlinkTree::new();
        for i in 0..10 {
            tree.write(&key(i), i);
        }
        {
            let mut scanner = tree.scan(None, None);
            assert!(scanner.has_next());
            // Dropped mid-leaf.
        }
        // A writer must not be blocked afterwards.
        tree.write(&key(3), 33);
        assert_eq!(tree.get(&key(3)), Some(33));
    }
}
