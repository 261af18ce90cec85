//! Result codes.
//!
//! Public operations fail only in the two key-presence cases; everything
//! else either succeeds or retries internally. The node-level outcome
//! codes in [`NodeRc`] drive the structure-modification loops and never
//! escape the crate boundary.

use thiserror::Error;

use crate::tree::NodeInfo;

/// Errors returned by the public index operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError<V> {
    /// `insert` found the key already present. Carries the payload that
    /// was in place and the version under which it was observed.
    #[error("key already exists")]
    KeyExists {
        /// The payload currently stored for the key.
        payload: V,
        /// Node identity and version at the time of the observation.
        info: NodeInfo,
    },

    /// `update` or `delete` found no record for the key.
    #[error("key does not exist")]
    KeyNotExist,
}

/// Internal per-node outcome codes.
///
/// These drive the retry/split/merge loops in `tree.rs` and are never
/// visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeRc {
    /// The operation finished; the node lock has been released.
    Completed,
    /// A record for the key is already present.
    KeyAlreadyInserted,
    /// No record for the key is present.
    KeyNotInserted,
    /// The record does not fit; the caller must split. The node is still
    /// exclusively locked.
    NeedSplit,
    /// The node dropped below the fill threshold; the caller may merge.
    /// The node holds a shared-intention-exclusive lock.
    NeedMerge,
    /// The planned merge is no longer valid (boundary moved).
    AbortMerge,
    /// An unfinished counterpart structure modification is visible; wait
    /// and retry.
    NeedRetry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: IndexError<u64> = IndexError::KeyNotExist;
        assert_eq!(err.to_string(), "key does not exist");
    }
}
