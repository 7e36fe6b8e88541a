use async_trait::async_trait;
use tracing::debug;

use fst_types::SnapshotId;

use crate::error::{DagError, DagResult};
use crate::snapshot::SnapshotMeta;

/// Append-only storage for snapshot records.
///
/// Backends implement the raw primitives; [`write_snapshot`] and
/// [`load_snapshot`] layer the history invariants on top:
///
/// - a snapshot's id must match its fields, on write and on every load
/// - every parent must already be stored when a child is written
/// - records are never replaced; rewriting an identical record is a no-op
///
/// [`write_snapshot`]: SnapshotStore::write_snapshot
/// [`load_snapshot`]: SnapshotStore::load_snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store `meta` unless its id is present. Returns `false` if it was.
    async fn insert(&self, meta: &SnapshotMeta) -> DagResult<bool>;

    /// Raw read without verification. `Ok(None)` if absent.
    async fn get(&self, id: &SnapshotId) -> DagResult<Option<SnapshotMeta>>;

    /// Every stored snapshot, in no particular order.
    async fn list(&self) -> DagResult<Vec<SnapshotMeta>>;

    async fn contains(&self, id: &SnapshotId) -> DagResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Validate and append a snapshot, returning its id.
    async fn write_snapshot(&self, meta: &SnapshotMeta) -> DagResult<SnapshotId> {
        meta.verify()?;
        if let Some(existing) = self.get(&meta.id).await? {
            return if existing == *meta {
                Ok(meta.id)
            } else {
                Err(DagError::Conflict(meta.id))
            };
        }
        for parent in &meta.parent_snapshot_ids {
            if !self.contains(parent).await? {
                return Err(DagError::DanglingParent {
                    snapshot: meta.id,
                    parent: *parent,
                });
            }
        }
        if !self.insert(meta).await? {
            // Lost a race with an identical or conflicting writer.
            let existing = self.get(&meta.id).await?;
            if existing.as_ref() != Some(meta) {
                return Err(DagError::Conflict(meta.id));
            }
        }
        debug!(
            snapshot = %meta.id.short_hex(),
            source = %meta.source,
            parents = meta.parent_snapshot_ids.len(),
            "wrote snapshot"
        );
        Ok(meta.id)
    }

    /// Read a snapshot and check that it still hashes to its id.
    async fn load_snapshot(&self, id: &SnapshotId) -> DagResult<SnapshotMeta> {
        let meta = self.get(id).await?.ok_or(DagError::NotFound(*id))?;
        if meta.id != *id {
            return Err(DagError::IntegrityViolation {
                claimed: *id,
                computed: meta.computed_id(),
            });
        }
        meta.verify()?;
        Ok(meta)
    }
}
