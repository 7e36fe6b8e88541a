//! Error types for workspace operations.

use fst_types::{ProjectId, WorkspaceId};
use thiserror::Error;

/// Errors that can occur during workspace operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The workspace was not found.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    /// The project was not found.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// A workspace with this id already exists.
    #[error("workspace already exists: {0}")]
    AlreadyExists(WorkspaceId),

    /// Another workspace in the project already uses this name.
    #[error("workspace name already taken in project: {name}")]
    NameTaken { name: String },

    /// The workspace name is invalid.
    #[error("invalid workspace name: {name}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during file-based operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal lock was poisoned by a panicking writer.
    #[error("workspace store lock poisoned")]
    LockPoisoned,
}

/// Convenience type alias for workspace operations.
pub type Result<T> = std::result::Result<T, RefError>;
