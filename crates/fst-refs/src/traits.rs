//! The [`WorkspaceStore`] trait defining the workspace storage interface.

use async_trait::async_trait;

use fst_types::{ProjectId, SnapshotId, WorkspaceId};

use crate::error::{RefError, Result};
use crate::types::{MergeRecord, ProjectInfo, Workspace};

/// Result of a conditional head update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The head was replaced; `version` is the new version.
    Updated { version: u64 },
    /// The stored version did not match; nothing was written.
    VersionMismatch {
        actual_version: u64,
        actual_head: Option<SnapshotId>,
    },
}

impl CasOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, CasOutcome::Updated { .. })
    }
}

/// Storage backend for projects and workspace records.
///
/// Implementations must be thread-safe (`Send + Sync`). The one operation
/// that requires atomicity is [`compare_and_swap_head`]: the version check
/// and the write must happen as a single step so that of two concurrent
/// callers holding the same expected version exactly one succeeds.
///
/// [`compare_and_swap_head`]: WorkspaceStore::compare_and_swap_head
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Create or replace a project record.
    async fn put_project(&self, project: &ProjectInfo) -> Result<()>;

    /// Returns `Ok(None)` if the project does not exist.
    async fn get_project(&self, id: &ProjectId) -> Result<Option<ProjectInfo>>;

    /// Insert a new workspace. Fails if the id exists or the name is taken
    /// within the project.
    async fn create_workspace(&self, workspace: &Workspace) -> Result<()>;

    /// Returns `Ok(None)` if the workspace does not exist.
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>>;

    /// All workspaces of a project, ordered by creation time.
    async fn list_workspaces(&self, project: &ProjectId) -> Result<Vec<Workspace>>;

    /// Point the head at `new_head` only if the stored version equals
    /// `expected_version`. On success the version is incremented.
    async fn compare_and_swap_head(
        &self,
        id: &WorkspaceId,
        expected_version: u64,
        new_head: SnapshotId,
    ) -> Result<CasOutcome>;

    /// Unconditionally repoint the head, incrementing the version. Returns
    /// the new version.
    async fn set_head(&self, id: &WorkspaceId, new_head: SnapshotId) -> Result<u64>;

    /// Record a successful merge from `source`, replacing any earlier entry.
    /// Does not touch the head or version.
    async fn record_merge(
        &self,
        id: &WorkspaceId,
        source: &WorkspaceId,
        record: MergeRecord,
    ) -> Result<()>;

    /// Like [`get_workspace`](Self::get_workspace) but missing is an error.
    async fn require_workspace(&self, id: &WorkspaceId) -> Result<Workspace> {
        self.get_workspace(id)
            .await?
            .ok_or(RefError::WorkspaceNotFound(*id))
    }

    /// Look a workspace up by name within a project.
    async fn find_by_name(&self, project: &ProjectId, name: &str) -> Result<Option<Workspace>> {
        Ok(self
            .list_workspaces(project)
            .await?
            .into_iter()
            .find(|w| w.name == name))
    }
}
