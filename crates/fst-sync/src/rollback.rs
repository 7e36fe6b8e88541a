use async_trait::async_trait;
use tracing::{debug, warn};

use fst_dag::SnapshotStore;
use fst_store::{ContentStore, LiveSet, ObjectKind, ReferenceSource, StoreResult};
use fst_types::{ContentHash, SnapshotId};

/// Objects one execute attempt created, so a failure can remove them.
///
/// Only objects whose write reported `created == true` are tracked; an
/// object that already existed belongs to someone else.
#[derive(Debug, Default)]
pub struct RollbackContext {
    blobs: Vec<ContentHash>,
    manifests: Vec<ContentHash>,
}

impl RollbackContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_blob(&mut self, hash: ContentHash) {
        self.blobs.push(hash);
    }

    pub fn track_manifest(&mut self, hash: ContentHash) {
        self.manifests.push(hash);
    }

    pub fn blobs(&self) -> &[ContentHash] {
        &self.blobs
    }

    pub fn manifests(&self) -> &[ContentHash] {
        &self.manifests
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty() && self.manifests.is_empty()
    }

    /// Delete everything tracked, newest first, except objects in `keep`.
    ///
    /// Never fails: each problem is logged and returned as a message.
    pub async fn rollback(self, store: &dyn ContentStore, keep: &LiveSet) -> Vec<String> {
        let mut errors = Vec::new();
        let objects = self
            .manifests
            .iter()
            .rev()
            .map(|h| (ObjectKind::Manifest, h))
            .chain(self.blobs.iter().rev().map(|h| (ObjectKind::Blob, h)));

        for (kind, hash) in objects {
            if keep.contains(kind, hash) {
                debug!(%kind, hash = %hash.short_hex(), "kept: referenced elsewhere");
                continue;
            }
            if let Err(e) = store.remove(kind, hash).await {
                warn!(%kind, hash = %hash.short_hex(), error = %e, "rollback delete failed");
                errors.push(format!("{kind} {hash}: {e}"));
            }
        }
        errors
    }
}

/// Manifests referenced by snapshots, optionally ignoring one snapshot.
pub(crate) struct SnapshotReferences<'a> {
    pub snapshots: &'a dyn SnapshotStore,
    pub ignore: Option<SnapshotId>,
}

#[async_trait]
impl ReferenceSource for SnapshotReferences<'_> {
    async fn referenced_manifests(&self) -> StoreResult<Vec<ContentHash>> {
        let all = self
            .snapshots
            .list()
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(all
            .into_iter()
            .filter(|s| Some(s.id) != self.ignore)
            .map(|s| s.manifest_hash)
            .collect())
    }
}
