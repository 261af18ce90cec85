//! Page geometry and tuning constants.
//!
//! Every constant here has a default suitable for 4 KiB pages and small
//! payloads; embedders tune the engine by editing this module at build
//! time. The compile-time assertions at the bottom reject geometries in
//! which a node could not hold at least two maximum-size records.

use std::time::Duration;

/// Size of one node page in bytes. All nodes share this size.
pub const PAGE_SIZE: usize = 4096;

/// Maximum serialized key length in bytes. Longer keys are rejected by a
/// runtime assertion at the tree boundary.
pub const MAX_KEY_LEN: usize = 128;

/// Maximum payload length in bytes. Payload types are fixed-length and
/// byte-copied into pages; child pointers in inner nodes count as payloads.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Length of one record-metadata directory entry.
pub const META_LEN: usize = 8;

/// The largest possible record footprint: key + payload + directory entry.
pub const MAX_RECORD_LEN: usize = MAX_KEY_LEN + MAX_PAYLOAD_LEN + META_LEN;

/// A node signals `NeedSplit` when an operation would leave less than this
/// many bytes of free space (after defragmentation).
pub const MIN_FREE_SPACE: usize = 2 * MAX_RECORD_LEN;

/// A node signals `NeedMerge` when its live bytes (directory + record
/// block, tombstones excluded) fall below this threshold.
///
/// Strictly below the post-split occupancy (~half a page), so a freshly
/// split node can never immediately qualify for a merge.
pub const MIN_USED_SPACE: usize = PAGE_SIZE / 8;

/// Sleep interval between retries when an unfinished structure
/// modification blocks the current one.
pub const RETRY_WAIT: Duration = Duration::from_micros(10);

/// Expected tree height, used to pre-size descent stacks.
pub const EXPECTED_TREE_HEIGHT: usize = 8;

/// Flag value for leaf nodes.
pub const LEAF_FLAG: u32 = 0;

/// Flag value for inner nodes.
pub const INNER_FLAG: u32 = 1;

/// Upper bound on the number of retired pages kept for reuse before
/// overflow is returned to the allocator.
pub const PAGE_POOL_CAP: usize = 64;

// ============================================================================
//  Compile-time geometry checks
// ============================================================================

const _: () = {
    // A node must always be able to hold two maximum-size records next to
    // its header and high key (header bound checked again in node.rs where
    // the exact header size is known).
    assert!(2 * MAX_RECORD_LEN + MAX_KEY_LEN + 128 <= PAGE_SIZE);
    assert!(MIN_USED_SPACE < PAGE_SIZE / 2);
    assert!(MIN_FREE_SPACE < PAGE_SIZE / 2);
    assert!(META_LEN == 8);
};
