//! In-memory workspace store for testing and ephemeral use.
//!
//! [`InMemoryWorkspaceStore`] keeps every record in maps behind a single
//! `RwLock`, which makes compare-and-swap trivially atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use fst_types::{ProjectId, SnapshotId, WorkspaceId};

use crate::error::{RefError, Result};
use crate::names::validate_workspace_name;
use crate::traits::{CasOutcome, WorkspaceStore};
use crate::types::{MergeRecord, ProjectInfo, Workspace};

#[derive(Debug, Default)]
struct State {
    projects: HashMap<ProjectId, ProjectInfo>,
    workspaces: HashMap<WorkspaceId, Workspace>,
}

/// An in-memory implementation of [`WorkspaceStore`].
///
/// Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceStore {
    state: RwLock<State>,
}

impl InMemoryWorkspaceStore {
    /// Create a new empty workspace store.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RefError::LockPoisoned)
    }

    fn with_workspace<T>(
        &self,
        id: &WorkspaceId,
        f: impl FnOnce(&mut Workspace) -> T,
    ) -> Result<T> {
        let mut state = self.write()?;
        let ws = state
            .workspaces
            .get_mut(id)
            .ok_or(RefError::WorkspaceNotFound(*id))?;
        Ok(f(ws))
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn put_project(&self, project: &ProjectInfo) -> Result<()> {
        self.write()?.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<ProjectInfo>> {
        let state = self.state.read().map_err(|_| RefError::LockPoisoned)?;
        Ok(state.projects.get(id).cloned())
    }

    async fn create_workspace(&self, workspace: &Workspace) -> Result<()> {
        validate_workspace_name(&workspace.name)?;
        let mut state = self.write()?;
        if state.workspaces.contains_key(&workspace.id) {
            return Err(RefError::AlreadyExists(workspace.id));
        }
        let taken = state
            .workspaces
            .values()
            .any(|w| w.project_id == workspace.project_id && w.name == workspace.name);
        if taken {
            return Err(RefError::NameTaken {
                name: workspace.name.clone(),
            });
        }
        state.workspaces.insert(workspace.id, workspace.clone());
        debug!(workspace = %workspace.id.short_id(), name = %workspace.name, "created workspace");
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        let state = self.state.read().map_err(|_| RefError::LockPoisoned)?;
        Ok(state.workspaces.get(id).cloned())
    }

    async fn list_workspaces(&self, project: &ProjectId) -> Result<Vec<Workspace>> {
        let state = self.state.read().map_err(|_| RefError::LockPoisoned)?;
        let mut out: Vec<Workspace> = state
            .workspaces
            .values()
            .filter(|w| w.project_id == *project)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    async fn compare_and_swap_head(
        &self,
        id: &WorkspaceId,
        expected_version: u64,
        new_head: SnapshotId,
    ) -> Result<CasOutcome> {
        self.with_workspace(id, |ws| {
            if ws.version != expected_version {
                return CasOutcome::VersionMismatch {
                    actual_version: ws.version,
                    actual_head: ws.head_snapshot_id,
                };
            }
            ws.head_snapshot_id = Some(new_head);
            ws.version += 1;
            CasOutcome::Updated {
                version: ws.version,
            }
        })
    }

    async fn set_head(&self, id: &WorkspaceId, new_head: SnapshotId) -> Result<u64> {
        self.with_workspace(id, |ws| {
            ws.head_snapshot_id = Some(new_head);
            ws.version += 1;
            ws.version
        })
    }

    async fn record_merge(
        &self,
        id: &WorkspaceId,
        source: &WorkspaceId,
        record: MergeRecord,
    ) -> Result<()> {
        self.with_workspace(id, |ws| {
            ws.merge_history.insert(*source, record);
        })
    }
}
