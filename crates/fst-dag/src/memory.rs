use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use fst_store::{ReferenceSource, StoreError, StoreResult};
use fst_types::{ContentHash, SnapshotId};

use crate::error::{DagError, DagResult};
use crate::snapshot::SnapshotMeta;
use crate::traits::SnapshotStore;

/// In-memory snapshot store for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    nodes: RwLock<HashMap<SnapshotId, SnapshotMeta>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert(&self, meta: &SnapshotMeta) -> DagResult<bool> {
        let mut nodes = self.nodes.write().map_err(|_| DagError::LockPoisoned)?;
        if nodes.contains_key(&meta.id) {
            return Ok(false);
        }
        nodes.insert(meta.id, meta.clone());
        Ok(true)
    }

    async fn get(&self, id: &SnapshotId) -> DagResult<Option<SnapshotMeta>> {
        let nodes = self.nodes.read().map_err(|_| DagError::LockPoisoned)?;
        Ok(nodes.get(id).cloned())
    }

    async fn list(&self) -> DagResult<Vec<SnapshotMeta>> {
        let nodes = self.nodes.read().map_err(|_| DagError::LockPoisoned)?;
        Ok(nodes.values().cloned().collect())
    }
}

#[async_trait]
impl ReferenceSource for InMemorySnapshotStore {
    async fn referenced_manifests(&self) -> StoreResult<Vec<ContentHash>> {
        let nodes = self.nodes.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(nodes.values().map(|s| s.manifest_hash).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{NewSnapshot, SnapshotSource};
    use fst_types::{ProjectId, Timestamp, WorkspaceId};

    fn snap(parents: &[SnapshotId], ms: i64) -> SnapshotMeta {
        NewSnapshot::new(
            ProjectId::new(),
            WorkspaceId::new(),
            ContentHash::from_bytes([ms as u8; 32]),
            SnapshotSource::Local,
        )
        .parents(parents.iter().copied())
        .author("test")
        .created_at(Timestamp::from_millis(ms))
        .build()
    }

    #[tokio::test]
    async fn write_and_load() {
        let store = InMemorySnapshotStore::new();
        let root = snap(&[], 1);
        let id = store.write_snapshot(&root).await.unwrap();
        assert_eq!(store.load_snapshot(&id).await.unwrap(), root);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn dangling_parent_rejected() {
        let store = InMemorySnapshotStore::new();
        let orphan = snap(&[SnapshotId::from_bytes([9; 32])], 2);
        assert!(matches!(
            store.write_snapshot(&orphan).await,
            Err(DagError::DanglingParent { .. })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn identical_rewrite_is_noop_conflicting_rewrite_fails() {
        let store = InMemorySnapshotStore::new();
        let root = snap(&[], 1);
        store.write_snapshot(&root).await.unwrap();
        store.write_snapshot(&root).await.unwrap();

        // Same id, different unhashed field.
        let mut other = root.clone();
        other.summary = Some("changed".into());
        assert!(matches!(
            store.write_snapshot(&other).await,
            Err(DagError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_id_rejected_on_write() {
        let store = InMemorySnapshotStore::new();
        let mut bad = snap(&[], 1);
        bad.author = "someone else".into();
        assert!(matches!(
            store.write_snapshot(&bad).await,
            Err(DagError::IntegrityViolation { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_record_fails_on_load() {
        let store = InMemorySnapshotStore::new();
        let mut s = snap(&[], 1);
        s.manifest_hash = ContentHash::from_bytes([0xee; 32]);
        // Bypass validation the way a corrupted backend would.
        store.insert(&s).await.unwrap();
        assert!(matches!(
            store.load_snapshot(&s.id).await,
            Err(DagError::IntegrityViolation { .. })
        ));
    }

    #[tokio::test]
    async fn missing_snapshot_not_found() {
        let store = InMemorySnapshotStore::new();
        assert!(matches!(
            store.load_snapshot(&SnapshotId::from_bytes([1; 32])).await,
            Err(DagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reference_source_lists_manifests() {
        let store = InMemorySnapshotStore::new();
        let root = snap(&[], 1);
        let child = snap(&[root.id], 2);
        store.write_snapshot(&root).await.unwrap();
        store.write_snapshot(&child).await.unwrap();
        let mut refs = store.referenced_manifests().await.unwrap();
        refs.sort();
        assert_eq!(refs, vec![root.manifest_hash, child.manifest_hash]);
    }
}
