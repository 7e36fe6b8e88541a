//! Snapshot records: immutable nodes of the history DAG.

use serde::{Deserialize, Serialize};

use fst_crypto::{compute_snapshot_id, SnapshotIdentity};
use fst_types::{ContentHash, ProjectId, SnapshotId, Timestamp, WorkspaceId};

use crate::error::{DagError, DagResult};

/// What produced a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Captured from the local working tree.
    Local,
    /// Result of a sync (merge) execute.
    Sync,
    /// Safety point written just before a sync is applied.
    PreSync,
    /// Written when a workspace is rolled back.
    Rollback,
    /// Starting point of a fork.
    Fork,
    /// Brought in from outside the engine.
    Import,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Sync => "sync",
            Self::PreSync => "pre_sync",
            Self::Rollback => "rollback",
            Self::Fork => "fork",
            Self::Import => "import",
        };
        f.write_str(s)
    }
}

/// Metadata for one snapshot.
///
/// `id` commits to `manifest_hash`, the parent set, `author` and
/// `created_at`. The first parent is the workspace's previous head; a sync
/// snapshot carries the source head as its second parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub manifest_hash: ContentHash,
    pub parent_snapshot_ids: Vec<SnapshotId>,
    pub source: SnapshotSource,
    pub author: String,
    pub summary: Option<String>,
    pub created_at: Timestamp,
}

/// Fields needed to create a snapshot; the id is derived from them.
#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub manifest_hash: ContentHash,
    pub parent_snapshot_ids: Vec<SnapshotId>,
    pub source: SnapshotSource,
    pub author: String,
    pub summary: Option<String>,
    pub created_at: Timestamp,
}

impl NewSnapshot {
    pub fn new(
        project_id: ProjectId,
        workspace_id: WorkspaceId,
        manifest_hash: ContentHash,
        source: SnapshotSource,
    ) -> Self {
        Self {
            project_id,
            workspace_id,
            manifest_hash,
            parent_snapshot_ids: Vec::new(),
            source,
            author: String::new(),
            summary: None,
            created_at: Timestamp::now(),
        }
    }

    pub fn parents(mut self, parents: impl IntoIterator<Item = SnapshotId>) -> Self {
        self.parent_snapshot_ids = parents.into_iter().collect();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn created_at(mut self, at: Timestamp) -> Self {
        self.created_at = at;
        self
    }

    /// Derive the id and produce the full record.
    pub fn build(self) -> SnapshotMeta {
        let mut parents = Vec::with_capacity(self.parent_snapshot_ids.len());
        for p in self.parent_snapshot_ids {
            if !parents.contains(&p) {
                parents.push(p);
            }
        }
        let id = compute_snapshot_id(&SnapshotIdentity {
            manifest_hash: &self.manifest_hash,
            parents: &parents,
            author: &self.author,
            created_at: &self.created_at,
        });
        SnapshotMeta {
            id,
            project_id: self.project_id,
            workspace_id: self.workspace_id,
            manifest_hash: self.manifest_hash,
            parent_snapshot_ids: parents,
            source: self.source,
            author: self.author,
            summary: self.summary,
            created_at: self.created_at,
        }
    }
}

impl SnapshotMeta {
    /// Recompute the id from the record's fields.
    pub fn computed_id(&self) -> SnapshotId {
        compute_snapshot_id(&SnapshotIdentity {
            manifest_hash: &self.manifest_hash,
            parents: &self.parent_snapshot_ids,
            author: &self.author,
            created_at: &self.created_at,
        })
    }

    /// Fail with `IntegrityViolation` if the fields no longer match the id.
    pub fn verify(&self) -> DagResult<()> {
        let computed = self.computed_id();
        if computed != self.id {
            return Err(DagError::IntegrityViolation {
                claimed: self.id,
                computed,
            });
        }
        Ok(())
    }

    pub fn first_parent(&self) -> Option<&SnapshotId> {
        self.parent_snapshot_ids.first()
    }

    pub fn is_root(&self) -> bool {
        self.parent_snapshot_ids.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_snapshot_ids.len() > 1
    }
}
