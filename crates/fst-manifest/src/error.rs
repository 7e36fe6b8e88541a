/// Errors from building or decoding manifests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// Two entries share the same path.
    #[error("duplicate path in manifest: {0}")]
    DuplicatePath(String),

    /// A path is empty, absolute, or escapes the workspace root.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The manifest declares a format version this build does not read.
    #[error("unsupported manifest version: {0}")]
    UnsupportedVersion(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
