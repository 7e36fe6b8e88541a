//! A project directory and the stores behind it.
//!
//! ```text
//! .fst/
//!   config.toml        SyncConfig, every key optional
//!   local.toml         which project this directory holds, and which
//!                      workspace its files belong to
//!   {scope}/           blobs, manifests, snapshots, workspaces, previews
//!   {scope}/activity.jsonl
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};

use fst_dag::{FsSnapshotStore, SnapshotStore};
use fst_manifest::Manifest;
use fst_refs::{FsWorkspaceStore, ProjectInfo, Workspace, WorkspaceStore};
use fst_store::{ContentStore, FsContentStore};
use fst_sync::{FsEphemeralStore, JsonlActivityLog, SyncConfig, SyncCoordinator};
use fst_types::{ProjectId, SnapshotId, WorkspaceId};

pub const FST_DIR: &str = ".fst";
const LOCAL_FILE: &str = "local.toml";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_SCOPE: &str = "store";
const PREVIEWS_DIR: &str = "previews";
const ACTIVITY_FILE: &str = "activity.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct LocalState {
    project_id: ProjectId,
    scope: String,
    /// Workspace the directory is checked out to; main when absent.
    #[serde(default)]
    checkout: Option<WorkspaceId>,
}

pub struct Project {
    pub root: PathBuf,
    pub info: ProjectInfo,
    pub config: SyncConfig,
    /// Workspace whose head the directory holds.
    pub checkout: WorkspaceId,
    scope: String,
    pub content: Arc<FsContentStore>,
    pub snapshots: Arc<FsSnapshotStore>,
    pub workspaces: Arc<FsWorkspaceStore>,
}

impl Project {
    /// Create `.fst/` under `root` with a project and its main workspace.
    pub async fn init(root: &Path, name: &str) -> anyhow::Result<Self> {
        let fst_dir = root.join(FST_DIR);
        if tokio::fs::try_exists(fst_dir.join(LOCAL_FILE)).await? {
            bail!("{} already holds an fst project", root.display());
        }
        tokio::fs::create_dir_all(&fst_dir).await?;

        let workspaces = FsWorkspaceStore::open(&fst_dir, DEFAULT_SCOPE).await?;
        let mut info = ProjectInfo::new(name);
        let main = Workspace::new(info.id, "main");
        workspaces.create_workspace(&main).await?;
        info.main_workspace_id = Some(main.id);
        workspaces.put_project(&info).await?;

        let config_path = fst_dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&config_path).await? {
            tokio::fs::write(&config_path, SyncConfig::default().to_toml()?).await?;
        }
        let local = LocalState {
            project_id: info.id,
            scope: DEFAULT_SCOPE.to_string(),
            checkout: Some(main.id),
        };
        write_local(&fst_dir, &local).await?;

        Self::open(root).await
    }

    pub async fn open(root: &Path) -> anyhow::Result<Self> {
        let fst_dir = root.join(FST_DIR);
        let text = tokio::fs::read_to_string(fst_dir.join(LOCAL_FILE))
            .await
            .with_context(|| format!("{} is not an fst project (run `fst init`)", root.display()))?;
        let local: LocalState = toml::from_str(&text).context("parsing .fst/local.toml")?;
        let config = SyncConfig::load(&fst_dir.join(CONFIG_FILE)).await?;

        let content = FsContentStore::open(&fst_dir, &local.scope)
            .await?
            .with_batch_limit(config.exists_batch_limit);
        let snapshots = FsSnapshotStore::open(&fst_dir, &local.scope).await?;
        let workspaces = FsWorkspaceStore::open(&fst_dir, &local.scope).await?;
        let info = workspaces
            .get_project(&local.project_id)
            .await?
            .ok_or_else(|| anyhow!("project {} is missing from .fst", local.project_id))?;
        let checkout = local
            .checkout
            .or(info.main_workspace_id)
            .context("no workspace is checked out and the project has no main workspace")?;

        Ok(Self {
            root: root.to_path_buf(),
            info,
            config,
            checkout,
            scope: local.scope,
            content: Arc::new(content),
            snapshots: Arc::new(snapshots),
            workspaces: Arc::new(workspaces),
        })
    }

    fn scope_dir(&self) -> PathBuf {
        self.root.join(FST_DIR).join(&self.scope)
    }

    pub fn author() -> String {
        std::env::var("USER").unwrap_or_else(|_| "fst".to_string())
    }

    pub async fn coordinator(&self) -> anyhow::Result<SyncCoordinator> {
        let previews = FsEphemeralStore::open(self.scope_dir().join(PREVIEWS_DIR)).await?;
        Ok(SyncCoordinator::new(
            self.content.clone(),
            self.snapshots.clone(),
            self.workspaces.clone(),
        )
        .with_previews(Arc::new(previews))
        .with_activity(Arc::new(JsonlActivityLog::new(self.scope_dir().join(ACTIVITY_FILE))))
        .with_config(self.config.clone())
        .with_author(Self::author()))
    }

    pub async fn workspace(&self, name: &str) -> anyhow::Result<Workspace> {
        self.workspaces
            .find_by_name(&self.info.id, name)
            .await?
            .ok_or_else(|| anyhow!("no workspace named `{name}`"))
    }

    /// The named workspace, or the checked-out one when `name` is `None`.
    pub async fn workspace_or_checkout(&self, name: Option<&str>) -> anyhow::Result<Workspace> {
        match name {
            Some(name) => self.workspace(name).await,
            None => self.checked_out().await,
        }
    }

    pub async fn checked_out(&self) -> anyhow::Result<Workspace> {
        Ok(self.workspaces.require_workspace(&self.checkout).await?)
    }

    /// Record `id` as the workspace the directory now holds.
    pub async fn set_checkout(&mut self, id: WorkspaceId) -> anyhow::Result<()> {
        let local = LocalState {
            project_id: self.info.id,
            scope: self.scope.clone(),
            checkout: Some(id),
        };
        write_local(&self.root.join(FST_DIR), &local).await?;
        self.checkout = id;
        Ok(())
    }

    pub async fn head_manifest(&self, workspace: &Workspace) -> anyhow::Result<Manifest> {
        match workspace.head_snapshot_id {
            None => Ok(Manifest::empty()),
            Some(head) => {
                let meta = self.snapshots.load_snapshot(&head).await?;
                Ok(self.content.load_manifest(&meta.manifest_hash).await?)
            }
        }
    }

    /// A full snapshot id, or a prefix matching exactly one snapshot.
    pub async fn resolve_snapshot(&self, text: &str) -> anyhow::Result<SnapshotId> {
        if text.len() == 64 {
            return Ok(SnapshotId::from_hex(text)?);
        }
        let prefix = text.to_ascii_lowercase();
        let matches: Vec<SnapshotId> = self
            .snapshots
            .list()
            .await?
            .into_iter()
            .map(|s| s.id)
            .filter(|id| id.to_hex().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [one] => Ok(*one),
            [] => bail!("no snapshot matches `{text}`"),
            _ => bail!("`{text}` matches {} snapshots", matches.len()),
        }
    }
}

async fn write_local(fst_dir: &Path, local: &LocalState) -> anyhow::Result<()> {
    tokio::fs::write(fst_dir.join(LOCAL_FILE), toml::to_string_pretty(local)?).await?;
    Ok(())
}
