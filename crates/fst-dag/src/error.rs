//! Error types for snapshot history.

use fst_refs::RefError;
use fst_types::SnapshotId;

/// Errors that can occur during snapshot history operations.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A referenced snapshot was not found.
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),

    /// A parent reference points to a snapshot that does not exist.
    #[error("dangling parent reference: snapshot {snapshot} references missing parent {parent}")]
    DanglingParent {
        /// The snapshot containing the bad reference.
        snapshot: SnapshotId,
        /// The missing parent.
        parent: SnapshotId,
    },

    /// A snapshot's fields do not hash to its id.
    #[error("integrity violation: snapshot {claimed} hashes to {computed}")]
    IntegrityViolation {
        claimed: SnapshotId,
        computed: SnapshotId,
    },

    /// A different record already exists under this id.
    #[error("conflicting snapshot record for {0}")]
    Conflict(SnapshotId),

    /// Workspace lookup failed during merge-base resolution.
    #[error(transparent)]
    Refs(#[from] RefError),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal lock was poisoned by a panicking writer.
    #[error("snapshot store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for snapshot history results.
pub type DagResult<T> = Result<T, DagError>;
