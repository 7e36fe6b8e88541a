use async_trait::async_trait;
use tracing::debug;

use fst_crypto::ContentHasher;
use fst_manifest::Manifest;
use fst_types::{ContentHash, Timestamp};

use crate::error::{ObjectKind, StoreError, StoreResult};

/// Largest batch accepted by [`ContentStore::exists`] unless a backend is
/// configured otherwise.
pub const DEFAULT_EXISTS_BATCH_LIMIT: usize = 100;

/// Answer to a batched existence query. Both lists keep request order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExistsResult {
    pub existing: Vec<ContentHash>,
    pub missing: Vec<ContentHash>,
}

/// Listing entry for a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub hash: ContentHash,
    pub size: u64,
    pub stored_at: Timestamp,
}

/// Content-addressed blob and manifest store.
///
/// All implementations must satisfy these invariants:
/// - Objects are write-once. A second write of the same hash returns
///   `Ok(false)` and leaves the stored bytes untouched.
/// - Writes verify `SHA-256(bytes) == hash` before storing anything.
/// - A concurrent reader sees either nothing or the complete object.
/// - All I/O errors are propagated, never silently ignored.
///
/// Backends implement the raw per-kind primitives; batching, manifest
/// encoding and hash enforcement are provided on top.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Maximum number of hashes accepted by one [`exists`](Self::exists) call.
    fn exists_batch_limit(&self) -> usize {
        DEFAULT_EXISTS_BATCH_LIMIT
    }

    /// Whether an object of `kind` is stored under `hash`.
    async fn contains(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool>;

    /// Store already-verified bytes. Returns `false` if the object existed.
    async fn insert(&self, kind: ObjectKind, hash: &ContentHash, data: &[u8]) -> StoreResult<bool>;

    /// Read an object's bytes.
    async fn read(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<Vec<u8>>;

    /// Remove an object. Returns `true` if it existed.
    ///
    /// Intended for rollback and garbage collection only.
    async fn remove(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool>;

    /// Every stored object of `kind`, sorted by hash.
    async fn list(&self, kind: ObjectKind) -> StoreResult<Vec<ObjectInfo>>;

    // -----------------------------------------------------------------------
    // Provided operations
    // -----------------------------------------------------------------------

    /// Partition `hashes` into blobs that are stored and blobs that are not.
    async fn exists(&self, hashes: &[ContentHash]) -> StoreResult<ExistsResult> {
        let limit = self.exists_batch_limit();
        if hashes.len() > limit {
            return Err(StoreError::BatchTooLarge {
                size: hashes.len(),
                limit,
            });
        }
        let mut result = ExistsResult::default();
        for hash in hashes {
            if self.contains(ObjectKind::Blob, hash).await? {
                result.existing.push(*hash);
            } else {
                result.missing.push(*hash);
            }
        }
        Ok(result)
    }

    /// Upload a blob. Returns `true` if it was newly created.
    async fn put_blob(&self, hash: &ContentHash, data: &[u8]) -> StoreResult<bool> {
        verify(hash, data)?;
        let created = self.insert(ObjectKind::Blob, hash, data).await?;
        debug!(hash = %hash.short_hex(), size = data.len(), created, "put blob");
        Ok(created)
    }

    async fn get_blob(&self, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        self.read(ObjectKind::Blob, hash).await
    }

    async fn has_blob(&self, hash: &ContentHash) -> StoreResult<bool> {
        self.contains(ObjectKind::Blob, hash).await
    }

    async fn delete_blob(&self, hash: &ContentHash) -> StoreResult<bool> {
        self.remove(ObjectKind::Blob, hash).await
    }

    async fn list_blobs(&self) -> StoreResult<Vec<ObjectInfo>> {
        self.list(ObjectKind::Blob).await
    }

    /// Upload canonical manifest bytes. The bytes must hash to `hash` and
    /// parse as a valid manifest.
    async fn put_manifest(&self, hash: &ContentHash, json: &[u8]) -> StoreResult<bool> {
        verify(hash, json)?;
        Manifest::from_json(json)?;
        let created = self.insert(ObjectKind::Manifest, hash, json).await?;
        debug!(hash = %hash.short_hex(), created, "put manifest");
        Ok(created)
    }

    async fn get_manifest(&self, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        self.read(ObjectKind::Manifest, hash).await
    }

    async fn has_manifest(&self, hash: &ContentHash) -> StoreResult<bool> {
        self.contains(ObjectKind::Manifest, hash).await
    }

    async fn delete_manifest(&self, hash: &ContentHash) -> StoreResult<bool> {
        self.remove(ObjectKind::Manifest, hash).await
    }

    async fn list_manifests(&self) -> StoreResult<Vec<ObjectInfo>> {
        self.list(ObjectKind::Manifest).await
    }

    /// Encode and store a manifest, returning its hash and whether it was new.
    async fn write_manifest(&self, manifest: &Manifest) -> StoreResult<(ContentHash, bool)> {
        let json = manifest.to_canonical_json()?;
        let hash = ContentHasher::hash(&json);
        let created = self.put_manifest(&hash, &json).await?;
        Ok((hash, created))
    }

    /// Fetch and decode a manifest.
    async fn load_manifest(&self, hash: &ContentHash) -> StoreResult<Manifest> {
        let json = self.get_manifest(hash).await?;
        Ok(Manifest::from_json(&json)?)
    }
}

fn verify(expected: &ContentHash, data: &[u8]) -> StoreResult<()> {
    let computed = ContentHasher::hash(data);
    if computed != *expected {
        return Err(StoreError::HashMismatch {
            expected: *expected,
            computed,
        });
    }
    Ok(())
}
