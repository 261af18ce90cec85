//! # blinktree
//!
//! A concurrent in-memory B+tree index mapping byte-slice keys to
//! fixed-length payloads.
//!
//! The tree keeps a high key and sibling links in every node (B-link
//! style), which lets readers descend without any locks: a reader that
//! lands on a node whose range no longer covers its key simply walks the
//! sibling chain to the right. Writers use short exclusive sections on
//! single nodes, and structure modifications (splits, merges, root
//! changes) are decomposed so that each step leaves the tree searchable.
//!
//! ## Concurrency model
//!
//! - **Readers** take a version snapshot, read, and validate. No locks on
//!   the descent path; point reads retry locally on interference.
//! - **Writers** descend without locks, then acquire an exclusive lock on
//!   the owning leaf (walking right if a concurrent split moved the key).
//! - **Structure modifications** publish sibling pointers before parent
//!   entries, so the tree is searchable at every intermediate state.
//! - **Scans** hold a shared lock on one leaf at a time, coupling to the
//!   next leaf before releasing the current one.
//!
//! ## Memory reclamation
//!
//! Nodes evicted by merges and root shrinks are retired through a
//! [`seize`] collector. Every public operation runs inside an epoch guard,
//! so a page is never reused while a thread that could still observe it is
//! active.
//!
//! ## Example
//!
//! ```
//! use blinktree::BlinkTree;
//!
//! let tree: BlinkTree<u64> = BlinkTree::new();
//! tree.write(b"apple", 1);
//! tree.write(b"banana", 2);
//!
//! assert_eq!(tree.get(b"apple"), Some(1));
//! let keys: Vec<_> = tree.scan(None, None).map(|(k, _)| k).collect();
//! assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec()]);
//! ```

pub mod consts;
pub mod error;
pub mod key;
pub mod version;

pub(crate) mod alloc;
pub(crate) mod node;
pub(crate) mod ordering;
pub(crate) mod trace;

pub mod tree;

pub use error::IndexError;
pub use key::{KeyComparator, Lexicographic};
pub use tree::scan::RangeScanner;
pub use tree::{BlinkTree, LevelStat, NodeInfo, Payload};
