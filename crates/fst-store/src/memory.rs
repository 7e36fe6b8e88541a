use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use fst_types::{ContentHash, Timestamp};

use crate::error::{ObjectKind, StoreError, StoreResult};
use crate::traits::{ContentStore, ObjectInfo, DEFAULT_EXISTS_BATCH_LIMIT};

#[derive(Clone)]
struct Stored {
    data: Vec<u8>,
    stored_at: Timestamp,
}

type ObjectMap = HashMap<ContentHash, Stored>;

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. Each object kind is held in its own map
/// behind a `RwLock`; no lock is held across an await point.
pub struct InMemoryContentStore {
    blobs: RwLock<ObjectMap>,
    manifests: RwLock<ObjectMap>,
    batch_limit: usize,
}

impl InMemoryContentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            manifests: RwLock::new(HashMap::new()),
            batch_limit: DEFAULT_EXISTS_BATCH_LIMIT,
        }
    }

    /// Override the `exists` batch cap.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    fn map(&self, kind: ObjectKind) -> &RwLock<ObjectMap> {
        match kind {
            ObjectKind::Blob => &self.blobs,
            ObjectKind::Manifest => &self.manifests,
        }
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Number of stored manifests.
    pub fn manifest_count(&self) -> usize {
        self.manifests.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Total bytes across all stored blobs.
    pub fn total_blob_bytes(&self) -> u64 {
        self.blobs
            .read()
            .map(|m| m.values().map(|s| s.data.len() as u64).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    fn exists_batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn contains(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool> {
        let map = self.map(kind).read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.contains_key(hash))
    }

    async fn insert(&self, kind: ObjectKind, hash: &ContentHash, data: &[u8]) -> StoreResult<bool> {
        let mut map = self.map(kind).write().map_err(|_| StoreError::LockPoisoned)?;
        if map.contains_key(hash) {
            return Ok(false);
        }
        map.insert(
            *hash,
            Stored {
                data: data.to_vec(),
                stored_at: Timestamp::now(),
            },
        );
        Ok(true)
    }

    async fn read(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        let map = self.map(kind).read().map_err(|_| StoreError::LockPoisoned)?;
        map.get(hash)
            .map(|s| s.data.clone())
            .ok_or(StoreError::NotFound { kind, hash: *hash })
    }

    async fn remove(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool> {
        let mut map = self.map(kind).write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.remove(hash).is_some())
    }

    async fn list(&self, kind: ObjectKind) -> StoreResult<Vec<ObjectInfo>> {
        let map = self.map(kind).read().map_err(|_| StoreError::LockPoisoned)?;
        let mut out: Vec<ObjectInfo> = map
            .iter()
            .map(|(hash, s)| ObjectInfo {
                hash: *hash,
                size: s.data.len() as u64,
                stored_at: s.stored_at,
            })
            .collect();
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(out)
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.blob_count())
            .field("manifest_count", &self.manifest_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fst_crypto::ContentHasher;
    use fst_manifest::{FileEntry, FileMode, Manifest};
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Blobs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_and_get_blob() {
        let store = InMemoryContentStore::new();
        let hash = ContentHasher::hash(b"hello world");
        assert!(store.put_blob(&hash, b"hello world").await.unwrap());
        assert_eq!(store.get_blob(&hash).await.unwrap(), b"hello world");
        assert!(store.has_blob(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn put_blob_is_idempotent() {
        let store = InMemoryContentStore::new();
        let hash = ContentHasher::hash(b"same");
        assert!(store.put_blob(&hash, b"same").await.unwrap());
        assert!(!store.put_blob(&hash, b"same").await.unwrap());
        assert_eq!(store.blob_count(), 1);
    }

    #[tokio::test]
    async fn put_blob_rejects_wrong_hash() {
        let store = InMemoryContentStore::new();
        let claimed = ContentHasher::hash(b"one thing");
        let err = store.put_blob(&claimed, b"another").await.unwrap_err();
        match err {
            StoreError::HashMismatch { expected, computed } => {
                assert_eq!(expected, claimed);
                assert_eq!(computed, ContentHasher::hash(b"another"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = InMemoryContentStore::new();
        let hash = ContentHasher::hash(b"nope");
        assert!(matches!(
            store.get_blob(&hash).await,
            Err(StoreError::NotFound {
                kind: ObjectKind::Blob,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn delete_blob() {
        let store = InMemoryContentStore::new();
        let hash = ContentHasher::hash(b"x");
        store.put_blob(&hash, b"x").await.unwrap();
        assert!(store.delete_blob(&hash).await.unwrap());
        assert!(!store.delete_blob(&hash).await.unwrap());
        assert!(!store.has_blob(&hash).await.unwrap());
    }

    // -----------------------------------------------------------------------
    // Existence queries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn exists_partitions_in_request_order() {
        let store = InMemoryContentStore::new();
        let a = ContentHasher::hash(b"a");
        let b = ContentHasher::hash(b"b");
        let c = ContentHasher::hash(b"c");
        store.put_blob(&b, b"b").await.unwrap();

        let result = store.exists(&[a, b, c]).await.unwrap();
        assert_eq!(result.existing, vec![b]);
        assert_eq!(result.missing, vec![a, c]);
    }

    #[tokio::test]
    async fn exists_rejects_oversized_batch() {
        let store = InMemoryContentStore::new();
        let hashes: Vec<ContentHash> = (0..101u32)
            .map(|i| ContentHasher::hash(&i.to_le_bytes()))
            .collect();
        assert!(matches!(
            store.exists(&hashes).await,
            Err(StoreError::BatchTooLarge {
                size: 101,
                limit: 100
            })
        ));
        assert!(store.exists(&hashes[..100]).await.is_ok());
    }

    #[tokio::test]
    async fn batch_limit_is_configurable() {
        let store = InMemoryContentStore::new().with_batch_limit(2);
        let hashes = [
            ContentHasher::hash(b"1"),
            ContentHasher::hash(b"2"),
            ContentHasher::hash(b"3"),
        ];
        assert!(store.exists(&hashes).await.is_err());
    }

    // -----------------------------------------------------------------------
    // Manifests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn write_and_load_manifest() {
        let store = InMemoryContentStore::new();
        let manifest = Manifest::from_entries(vec![FileEntry::for_content(
            "a.txt",
            b"hello",
            FileMode::REGULAR,
        )])
        .unwrap();
        let (hash, created) = store.write_manifest(&manifest).await.unwrap();
        assert!(created);
        assert_eq!(hash, manifest.hash().unwrap());
        assert_eq!(store.load_manifest(&hash).await.unwrap(), manifest);

        let (_, created) = store.write_manifest(&manifest).await.unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn put_manifest_rejects_non_manifest_bytes() {
        let store = InMemoryContentStore::new();
        let junk = b"not json";
        let hash = ContentHasher::hash(junk);
        assert!(matches!(
            store.put_manifest(&hash, junk).await,
            Err(StoreError::Manifest(_))
        ));
    }

    #[tokio::test]
    async fn listing_is_sorted_by_hash() {
        let store = InMemoryContentStore::new();
        for content in [&b"x"[..], b"y", b"z"] {
            store
                .put_blob(&ContentHasher::hash(content), content)
                .await
                .unwrap();
        }
        let listed = store.list_blobs().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].hash < w[1].hash));
        assert!(listed.iter().all(|i| i.size == 1));
    }

    proptest! {
        #[test]
        fn only_matching_hash_is_accepted(content in any::<Vec<u8>>(), other in any::<Vec<u8>>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryContentStore::new();
                let claimed = ContentHasher::hash(&other);
                let result = store.put_blob(&claimed, &content).await;
                if content == other {
                    prop_assert!(result.is_ok());
                } else {
                    let is_mismatch = matches!(result, Err(StoreError::HashMismatch { .. }));
                    prop_assert!(is_mismatch);
                    prop_assert_eq!(store.blob_count(), 0);
                }
                Ok(())
            })?;
        }
    }
}
