use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use fst_store::{ReferenceSource, StoreError, StoreResult};
use fst_types::{ContentHash, SnapshotId};

use crate::error::{DagError, DagResult};
use crate::snapshot::SnapshotMeta;
use crate::traits::SnapshotStore;

const SNAPSHOTS_DIR: &str = "snapshots";

/// Snapshot store keeping one JSON file per snapshot at
/// `{root}/{scope}/snapshots/{id}.json`.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub async fn open(root: impl AsRef<Path>, scope: &str) -> DagResult<Self> {
        let dir = root.as_ref().join(scope).join(SNAPSHOTS_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn decode(path: &Path, data: &[u8]) -> DagResult<SnapshotMeta> {
        serde_json::from_slice(data)
            .map_err(|e| DagError::Serialization(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn insert(&self, meta: &SnapshotMeta) -> DagResult<bool> {
        let dest = self.path(&meta.id);
        if tokio::fs::try_exists(&dest).await? {
            return Ok(false);
        }
        let data = serde_json::to_vec_pretty(meta)
            .map_err(|e| DagError::Serialization(e.to_string()))?;
        let dir = self.dir.clone();
        // persist_noclobber keeps the first writer's record if two race.
        let created = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            match tmp.persist_noclobber(&dest) {
                Ok(_) => Ok(true),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e.error),
            }
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(created)
    }

    async fn get(&self, id: &SnapshotId) -> DagResult<Option<SnapshotMeta>> {
        let path = self.path(id);
        match tokio::fs::read(&path).await {
            Ok(data) => Self::decode(&path, &data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> DagResult<Vec<SnapshotMeta>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await?;
            out.push(Self::decode(&path, &data)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl ReferenceSource for FsSnapshotStore {
    async fn referenced_manifests(&self) -> StoreResult<Vec<ContentHash>> {
        let snapshots = self.list().await.map_err(|e| match e {
            DagError::Io(io) => StoreError::Io(io),
            other => StoreError::Io(std::io::Error::other(other.to_string())),
        })?;
        Ok(snapshots.into_iter().map(|s| s.manifest_hash).collect())
    }
}
