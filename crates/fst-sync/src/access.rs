use async_trait::async_trait;
use tracing::warn;

use fst_refs::Workspace;
use fst_types::{SnapshotId, WorkspaceId};

use crate::coordinator::{Decisions, ExecuteOutcome, SyncCoordinator, SyncStatus, UndoOutcome};
use crate::error::{SyncError, SyncResult};
use crate::preview::SyncPreview;

/// Whoever is asking for an operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Actor {
    pub name: String,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn system() -> Self {
        Self::new("system")
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ownership check run before any sync operation touches a workspace.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn can_access(&self, actor: &Actor, workspace: &Workspace) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn can_access(&self, _actor: &Actor, _workspace: &Workspace) -> bool {
        true
    }
}

/// A coordinator bound to one actor. Every operation checks the gate for
/// each workspace it reads or writes.
pub struct Session<'a> {
    coordinator: &'a SyncCoordinator,
    gate: &'a dyn AccessGate,
    actor: Actor,
}

impl<'a> Session<'a> {
    pub fn new(coordinator: &'a SyncCoordinator, gate: &'a dyn AccessGate, actor: Actor) -> Self {
        Self {
            coordinator,
            gate,
            actor,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    async fn check(&self, workspace_id: &WorkspaceId) -> SyncResult<()> {
        let workspace = self.coordinator.workspaces().require_workspace(workspace_id).await?;
        if self.gate.can_access(&self.actor, &workspace).await {
            return Ok(());
        }
        warn!(actor = %self.actor, workspace = %workspace_id.short_id(), "access denied");
        Err(SyncError::AccessDenied {
            actor: self.actor.name.clone(),
            workspace: *workspace_id,
        })
    }

    pub async fn prepare(
        &self,
        workspace_id: &WorkspaceId,
        source: Option<&WorkspaceId>,
    ) -> SyncResult<SyncPreview> {
        self.check(workspace_id).await?;
        if let Some(source) = source {
            self.check(source).await?;
        }
        self.coordinator.prepare(workspace_id, source).await
    }

    pub async fn preview(&self, preview_id: &str) -> SyncResult<SyncPreview> {
        let preview = self.coordinator.preview(preview_id).await?;
        self.check(&preview.workspace_id).await?;
        Ok(preview)
    }

    pub async fn execute(&self, preview_id: &str, decisions: &Decisions) -> SyncResult<ExecuteOutcome> {
        let preview = self.coordinator.preview(preview_id).await?;
        self.check(&preview.workspace_id).await?;
        self.check(&preview.source_workspace_id).await?;
        self.coordinator.execute(preview_id, decisions).await
    }

    pub async fn undo(&self, workspace_id: &WorkspaceId, target: &SnapshotId) -> SyncResult<UndoOutcome> {
        self.check(workspace_id).await?;
        self.coordinator.undo(workspace_id, target).await
    }

    pub async fn status(
        &self,
        workspace_id: &WorkspaceId,
        source: Option<&WorkspaceId>,
    ) -> SyncResult<SyncStatus> {
        self.check(workspace_id).await?;
        if let Some(source) = source {
            self.check(source).await?;
        }
        self.coordinator.status(workspace_id, source).await
    }
}
