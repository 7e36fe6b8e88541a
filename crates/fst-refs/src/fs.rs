//! JSON-file workspace store.
//!
//! Layout under `{root}/{scope}/`:
//!
//! ```text
//! project.json
//! workspaces/{workspace_id}.json
//! ```
//!
//! A scope holds exactly one project. Every mutation is a read-modify-write
//! of one file performed while holding an exclusive advisory lock
//! (`workspaces/{workspace_id}.lock` for head and history updates,
//! `workspaces.lock` for creation and the project record), and files are
//! replaced by renaming a fully written temp file over them. The locks are
//! `flock`-style, so head updates stay atomic across store handles and
//! across processes sharing the directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use fst_types::{ProjectId, SnapshotId, WorkspaceId};

use crate::error::{RefError, Result};
use crate::names::validate_workspace_name;
use crate::traits::{CasOutcome, WorkspaceStore};
use crate::types::{MergeRecord, ProjectInfo, Workspace};

const PROJECT_FILE: &str = "project.json";
const WORKSPACES_DIR: &str = "workspaces";
const STORE_LOCK: &str = "workspaces.lock";

/// Held advisory lock; dropping it closes the file and releases the lock.
#[derive(Debug)]
struct FileLock {
    _file: std::fs::File,
}

impl FileLock {
    /// Block (on the blocking pool) until `path` is exclusively locked.
    async fn acquire(path: PathBuf) -> Result<Self> {
        let lock = tokio::task::spawn_blocking(move || -> std::io::Result<Self> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(Self { _file: file })
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(lock)
    }
}

/// A filesystem implementation of [`WorkspaceStore`].
#[derive(Debug, Clone)]
pub struct FsWorkspaceStore {
    base: PathBuf,
}

impl FsWorkspaceStore {
    /// Open (creating if needed) the store for `scope` under `root`.
    pub async fn open(root: impl AsRef<Path>, scope: &str) -> Result<Self> {
        let base = root.as_ref().join(scope);
        tokio::fs::create_dir_all(base.join(WORKSPACES_DIR)).await?;
        Ok(Self { base })
    }

    fn workspace_path(&self, id: &WorkspaceId) -> PathBuf {
        self.base.join(WORKSPACES_DIR).join(format!("{id}.json"))
    }

    fn workspace_lock_path(&self, id: &WorkspaceId) -> PathBuf {
        self.base.join(WORKSPACES_DIR).join(format!("{id}.lock"))
    }

    async fn lock_store(&self) -> Result<FileLock> {
        FileLock::acquire(self.base.join(STORE_LOCK)).await
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| RefError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| RefError::Serialization(e.to_string()))?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Load, mutate and rewrite one workspace under its file lock.
    async fn update<T: Send>(
        &self,
        id: &WorkspaceId,
        f: impl FnOnce(&mut Workspace) -> (T, bool) + Send,
    ) -> Result<T> {
        let _lock = FileLock::acquire(self.workspace_lock_path(id)).await?;
        let path = self.workspace_path(id);
        let mut ws: Workspace = Self::read_json(&path)
            .await?
            .ok_or(RefError::WorkspaceNotFound(*id))?;
        let (out, dirty) = f(&mut ws);
        if dirty {
            Self::write_json(&path, &ws).await?;
        }
        Ok(out)
    }

    async fn all_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(self.base.join(WORKSPACES_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(ws) = Self::read_json::<Workspace>(&path).await? {
                out.push(ws);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn put_project(&self, project: &ProjectInfo) -> Result<()> {
        let _lock = self.lock_store().await?;
        Self::write_json(&self.base.join(PROJECT_FILE), project).await
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<ProjectInfo>> {
        let project: Option<ProjectInfo> = Self::read_json(&self.base.join(PROJECT_FILE)).await?;
        Ok(project.filter(|p| p.id == *id))
    }

    async fn create_workspace(&self, workspace: &Workspace) -> Result<()> {
        validate_workspace_name(&workspace.name)?;
        let _lock = self.lock_store().await?;
        let path = self.workspace_path(&workspace.id);
        if tokio::fs::try_exists(&path).await? {
            return Err(RefError::AlreadyExists(workspace.id));
        }
        let taken = self
            .all_workspaces()
            .await?
            .iter()
            .any(|w| w.project_id == workspace.project_id && w.name == workspace.name);
        if taken {
            return Err(RefError::NameTaken {
                name: workspace.name.clone(),
            });
        }
        Self::write_json(&path, workspace).await?;
        debug!(workspace = %workspace.id.short_id(), name = %workspace.name, "created workspace");
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        Self::read_json(&self.workspace_path(id)).await
    }

    async fn list_workspaces(&self, project: &ProjectId) -> Result<Vec<Workspace>> {
        let mut out: Vec<Workspace> = self
            .all_workspaces()
            .await?
            .into_iter()
            .filter(|w| w.project_id == *project)
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
        self.update(id, |ws| {
            if ws.version != expected_version {
                let outcome = CasOutcome::VersionMismatch {
                    actual_version: ws.version,
                    actual_head: ws.head_snapshot_id,
                };
                return (outcome, false);
            }
            ws.head_snapshot_id = Some(new_head);
            ws.version += 1;
            (
                CasOutcome::Updated {
                    version: ws.version,
                },
                true,
            )
        })
        .await
    }

    async fn set_head(&self, id: &WorkspaceId, new_head: SnapshotId) -> Result<u64> {
        self.update(id, |ws| {
            ws.head_snapshot_id = Some(new_head);
            ws.version += 1;
            (ws.version, true)
        })
        .await
    }

    async fn record_merge(
        &self,
        id: &WorkspaceId,
        source: &WorkspaceId,
        record: MergeRecord,
    ) -> Result<()> {
        let source = *source;
        self.update(id, move |ws| {
            ws.merge_history.insert(source, record);
            ((), true)
        })
        .await
    }
}
