use thiserror::Error;

use fst_dag::DagError;
use fst_manifest::ManifestError;
use fst_merge::MergeError;
use fst_refs::RefError;
use fst_store::StoreError;
use fst_types::{ContentHash, WorkspaceId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    #[error("{what} not found: {id}")]
    NotFound { what: String, id: String },

    #[error("preview {0} has expired or does not exist")]
    PreviewExpired(String),

    #[error("no decision given for: {}", paths.join(", "))]
    MissingDecisions { paths: Vec<String> },

    #[error("merged manifest references {} missing blob(s)", missing.len())]
    ManifestInvalid {
        missing: Vec<ContentHash>,
        rollback_errors: Vec<String>,
    },

    #[error("workspace {workspace} was modified concurrently")]
    ConcurrentModification {
        workspace: WorkspaceId,
        rollback_errors: Vec<String>,
    },

    #[error("sync failed: {message}")]
    SyncFailed {
        message: String,
        rollback_errors: Vec<String>,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("access denied: {actor} may not use workspace {workspace}")]
    AccessDenied { actor: String, workspace: WorkspaceId },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("history error: {0}")]
    Dag(DagError),

    #[error("workspace error: {0}")]
    Refs(RefError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn sync_failed(message: impl Into<String>) -> Self {
        Self::SyncFailed {
            message: message.into(),
            rollback_errors: Vec::new(),
        }
    }

    /// Whether the caller can simply prepare and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::PreviewExpired(_)
        )
    }

    /// Short advice for an operator.
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ConcurrentModification { .. } => {
                Some("the workspace changed underneath this sync; re-run prepare")
            }
            Self::PreviewExpired(_) => Some("the preview is gone; prepare again"),
            Self::ManifestInvalid { .. } | Self::SyncFailed { .. } => {
                Some("state rolled back; safe to retry")
            }
            Self::MissingDecisions { .. } => Some("choose an option for every listed path"),
            _ => None,
        }
    }

    /// Rollback problems attached to a failed execute.
    pub fn rollback_errors(&self) -> &[String] {
        match self {
            Self::ManifestInvalid { rollback_errors, .. }
            | Self::ConcurrentModification { rollback_errors, .. }
            | Self::SyncFailed { rollback_errors, .. } => rollback_errors,
            _ => &[],
        }
    }

    /// Attach rollback problems without changing the error kind.
    pub fn with_rollback_errors(mut self, errors: Vec<String>) -> Self {
        match &mut self {
            Self::ManifestInvalid { rollback_errors, .. }
            | Self::ConcurrentModification { rollback_errors, .. }
            | Self::SyncFailed { rollback_errors, .. } => rollback_errors.extend(errors),
            _ => {}
        }
        self
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::HashMismatch { expected, computed } => Self::HashMismatch { expected, computed },
            StoreError::NotFound { kind, hash } => Self::NotFound {
                what: kind.to_string(),
                id: hash.to_hex(),
            },
            StoreError::ManifestInvalid { missing } => Self::ManifestInvalid {
                missing,
                rollback_errors: Vec::new(),
            },
            other => Self::Store(other),
        }
    }
}

impl From<DagError> for SyncError {
    fn from(e: DagError) -> Self {
        match e {
            DagError::NotFound(id) => Self::NotFound {
                what: "snapshot".into(),
                id: id.to_hex(),
            },
            other => Self::Dag(other),
        }
    }
}

impl From<RefError> for SyncError {
    fn from(e: RefError) -> Self {
        match e {
            RefError::WorkspaceNotFound(id) => Self::NotFound {
                what: "workspace".into(),
                id: id.to_string(),
            },
            RefError::ProjectNotFound(id) => Self::NotFound {
                what: "project".into(),
                id: id.to_string(),
            },
            other => Self::Refs(other),
        }
    }
}

impl From<MergeError> for SyncError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::Store(e) => e.into(),
        }
    }
}

impl From<bincode::Error> for SyncError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
