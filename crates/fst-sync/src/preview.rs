//! What a prepared sync would do, and the state needed to execute it.

use serde::{Deserialize, Serialize};

use fst_dag::MergeBase;
use fst_merge::{AutoAction, Decision, FileError, MergePlan};
use fst_types::{ContentHash, ProjectId, SnapshotId, Timestamp, WorkspaceId};

use crate::error::SyncResult;

/// Lifecycle of one sync attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    None,
    Prepared,
    Executing,
    Committed,
    RolledBack,
    Undone,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Prepared => "prepared",
            Self::Executing => "executing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Undone => "undone",
        };
        f.write_str(s)
    }
}

/// The reviewable part of a prepared sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPreview {
    pub id: String,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub source_workspace_id: WorkspaceId,
    pub merge_base: MergeBase,
    pub auto_actions: Vec<AutoAction>,
    pub decisions_needed: Vec<Decision>,
    pub file_errors: Vec<FileError>,
    pub in_sync_count: usize,
    pub excluded_count: usize,
    /// Paths the source deleted that this workspace keeps.
    pub source_deletions_kept: Vec<String>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl SyncPreview {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_plan(
        id: String,
        project_id: ProjectId,
        workspace_id: WorkspaceId,
        source_workspace_id: WorkspaceId,
        merge_base: MergeBase,
        plan: MergePlan,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id,
            project_id,
            workspace_id,
            source_workspace_id,
            merge_base,
            in_sync_count: plan.in_sync_count(),
            excluded_count: plan.excluded_count,
            auto_actions: plan.auto_actions,
            decisions_needed: plan.decisions_needed,
            file_errors: plan.file_errors,
            source_deletions_kept: plan.source_deletions_kept,
            created_at,
            expires_at,
        }
    }

    pub fn merge_base_id(&self) -> Option<SnapshotId> {
        self.merge_base.snapshot_id
    }

    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        self.expires_at.is_before(now)
    }

    /// `true` if executing would change no file.
    pub fn is_noop(&self) -> bool {
        self.auto_actions.is_empty() && self.decisions_needed.is_empty()
    }

    pub fn decision(&self, path: &str) -> Option<&Decision> {
        self.decisions_needed.iter().find(|d| d.path == path)
    }
}

/// A preview plus the exact inputs it was computed from. This is what the
/// ephemeral store holds between prepare and execute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedSync {
    pub preview: SyncPreview,
    pub current_head: Option<SnapshotId>,
    pub current_version: u64,
    pub source_head: Option<SnapshotId>,
    pub base_manifest_hash: Option<ContentHash>,
    pub current_manifest_hash: Option<ContentHash>,
    pub source_manifest_hash: Option<ContentHash>,
}

impl PreparedSync {
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
