use fst_manifest::ManifestError;
use fst_types::ContentHash;

/// The two kinds of object a content store holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Manifest,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => f.write_str("blob"),
            Self::Manifest => f.write_str("manifest"),
        }
    }
}

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("{kind} not found: {hash}")]
    NotFound { kind: ObjectKind, hash: ContentHash },

    /// Uploaded bytes do not hash to the claimed id.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    /// Stored bytes no longer hash to their key (on-disk corruption).
    #[error("corrupt {kind} {hash}: {reason}")]
    Corrupt {
        kind: ObjectKind,
        hash: ContentHash,
        reason: String,
    },

    /// An existence query named more hashes than the store accepts at once.
    #[error("batch of {size} hashes exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// A manifest lists blobs the store does not have.
    #[error("manifest references {} missing blob(s)", missing.len())]
    ManifestInvalid { missing: Vec<ContentHash> },

    /// The manifest bytes could not be parsed or encoded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
