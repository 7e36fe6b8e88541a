//! Core workspace types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fst_types::{ProjectId, SnapshotId, Timestamp, WorkspaceId};

/// A project groups workspaces and designates one of them as main.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
    /// The default sync source for every other workspace.
    pub main_workspace_id: Option<WorkspaceId>,
    pub created_at: Timestamp,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            main_workspace_id: None,
            created_at: Timestamp::now(),
        }
    }
}

/// Where a workspace was forked from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPoint {
    pub source_workspace_id: WorkspaceId,
    /// The source's head at the moment of the fork.
    pub snapshot_id: SnapshotId,
    pub forked_at: Timestamp,
}

/// The last successful merge from one particular source workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Source head that was merged in.
    pub last_merged_snapshot: SnapshotId,
    pub merged_at: Timestamp,
}

/// A workspace record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub project_id: ProjectId,
    pub name: String,
    /// Current snapshot. `None` until the first snapshot is recorded.
    pub head_snapshot_id: Option<SnapshotId>,
    /// Optimistic-lock token, incremented on every head update.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkPoint>,
    /// Keyed by source workspace id.
    #[serde(default)]
    pub merge_history: BTreeMap<WorkspaceId, MergeRecord>,
    pub created_at: Timestamp,
}

impl Workspace {
    /// A fresh workspace with no history.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: WorkspaceId::new(),
            project_id,
            name: name.into(),
            head_snapshot_id: None,
            version: 0,
            fork: None,
            merge_history: BTreeMap::new(),
            created_at: Timestamp::now(),
        }
    }

    /// A workspace forked from `source`, starting at the source's head.
    pub fn forked_from(source: &Workspace, name: impl Into<String>) -> Self {
        let mut ws = Self::new(source.project_id, name);
        ws.head_snapshot_id = source.head_snapshot_id;
        ws.fork = source.head_snapshot_id.map(|snapshot_id| ForkPoint {
            source_workspace_id: source.id,
            snapshot_id,
            forked_at: ws.created_at,
        });
        ws
    }

    /// Id of the workspace this one was forked from.
    pub fn forked_from_id(&self) -> Option<WorkspaceId> {
        self.fork.as_ref().map(|f| f.source_workspace_id)
    }

    /// Snapshot at which this workspace was forked.
    pub fn fork_snapshot(&self) -> Option<SnapshotId> {
        self.fork.as_ref().map(|f| f.snapshot_id)
    }

    /// Last snapshot merged in from `source`, if any.
    pub fn last_merged_from(&self, source: &WorkspaceId) -> Option<SnapshotId> {
        self.merge_history
            .get(source)
            .map(|r| r.last_merged_snapshot)
    }
}
