//! Error types for the merge engine.

use fst_store::StoreError;

/// Errors that abort planning a merge.
///
/// Per-file problems (a missing blob, a failing reconciler) do not surface
/// here; they are recovered inside the plan.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;
