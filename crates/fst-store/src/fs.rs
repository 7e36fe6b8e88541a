use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use fst_crypto::ContentHasher;
use fst_types::{ContentHash, Timestamp};

use crate::error::{ObjectKind, StoreError, StoreResult};
use crate::traits::{ContentStore, ObjectInfo, DEFAULT_EXISTS_BATCH_LIMIT};

const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";
const TMP_DIR: &str = "tmp";
const MANIFEST_EXT: &str = ".json";

/// Filesystem content store.
///
/// Layout under `{root}/{scope}/`:
///
/// ```text
/// blobs/{sha256}
/// manifests/{sha256}.json
/// tmp/            staging area for in-flight writes
/// ```
///
/// Objects are staged in `tmp/` and renamed into place, so a reader either
/// sees the whole object or none of it.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    base: PathBuf,
    batch_limit: usize,
}

impl FsContentStore {
    /// Open (creating if needed) the store for `scope` under `root`.
    pub async fn open(root: impl AsRef<Path>, scope: &str) -> StoreResult<Self> {
        let base = root.as_ref().join(scope);
        for dir in [BLOBS_DIR, MANIFESTS_DIR, TMP_DIR] {
            tokio::fs::create_dir_all(base.join(dir)).await?;
        }
        debug!(path = %base.display(), "opened fs content store");
        Ok(Self {
            base,
            batch_limit: DEFAULT_EXISTS_BATCH_LIMIT,
        })
    }

    /// Override the `exists` batch cap.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Directory holding this scope's objects.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn dir(&self, kind: ObjectKind) -> PathBuf {
        match kind {
            ObjectKind::Blob => self.base.join(BLOBS_DIR),
            ObjectKind::Manifest => self.base.join(MANIFESTS_DIR),
        }
    }

    fn object_path(&self, kind: ObjectKind, hash: &ContentHash) -> PathBuf {
        match kind {
            ObjectKind::Blob => self.dir(kind).join(hash.to_hex()),
            ObjectKind::Manifest => self
                .dir(kind)
                .join(format!("{}{MANIFEST_EXT}", hash.to_hex())),
        }
    }

    fn parse_name(kind: ObjectKind, name: &str) -> Option<ContentHash> {
        let hex = match kind {
            ObjectKind::Blob => name,
            ObjectKind::Manifest => name.strip_suffix(MANIFEST_EXT)?,
        };
        ContentHash::from_hex(hex).ok()
    }
}

/// Write `data` to a temp file in `tmp_dir`, then move it to `dest` unless
/// another writer got there first. Returns whether this call created `dest`.
fn write_atomic(tmp_dir: &Path, dest: &Path, data: &[u8]) -> std::io::Result<bool> {
    let mut tmp = tempfile::NamedTempFile::new_in(tmp_dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(dest) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    fn exists_batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn contains(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(kind, hash)).await?)
    }

    async fn insert(&self, kind: ObjectKind, hash: &ContentHash, data: &[u8]) -> StoreResult<bool> {
        let dest = self.object_path(kind, hash);
        if tokio::fs::try_exists(&dest).await? {
            return Ok(false);
        }
        let tmp_dir = self.base.join(TMP_DIR);
        let data = data.to_vec();
        let created = tokio::task::spawn_blocking(move || write_atomic(&tmp_dir, &dest, &data))
            .await
            .map_err(std::io::Error::other)??;
        if !created {
            debug!(hash = %hash.short_hex(), %kind, "object stored by a concurrent writer");
        }
        Ok(created)
    }

    async fn read(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        let data = match tokio::fs::read(self.object_path(kind, hash)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { kind, hash: *hash });
            }
            Err(e) => return Err(e.into()),
        };
        let computed = ContentHasher::hash(&data);
        if computed != *hash {
            return Err(StoreError::Corrupt {
                kind,
                hash: *hash,
                reason: format!("content hashes to {computed}"),
            });
        }
        Ok(data)
    }

    async fn remove(&self, kind: ObjectKind, hash: &ContentHash) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.object_path(kind, hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: ObjectKind) -> StoreResult<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir(kind)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(hash) = name.to_str().and_then(|n| Self::parse_name(kind, n)) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let stored_at = meta
                .modified()
                .map(Timestamp::from_system_time)
                .unwrap_or_else(|_| Timestamp::now());
            out.push(ObjectInfo {
                hash,
                size: meta.len(),
                stored_at,
            });
        }
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fst_manifest::{FileEntry, FileMode, Manifest};

    async fn open_temp() -> (tempfile::TempDir, FsContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path(), "proj").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn layout_on_disk() {
        let (dir, store) = open_temp().await;
        let hash = ContentHasher::hash(b"file body");
        store.put_blob(&hash, b"file body").await.unwrap();

        let manifest = Manifest::from_entries(vec![FileEntry::new(
            "a.txt",
            hash,
            9,
            FileMode::REGULAR,
        )])
        .unwrap();
        let (mhash, _) = store.write_manifest(&manifest).await.unwrap();

        let base = dir.path().join("proj");
        assert!(base.join("blobs").join(hash.to_hex()).is_file());
        assert!(base
            .join("manifests")
            .join(format!("{}.json", mhash.to_hex()))
            .is_file());
        assert_eq!(store.load_manifest(&mhash).await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn put_is_write_once() {
        let (_dir, store) = open_temp().await;
        let hash = ContentHasher::hash(b"v");
        assert!(store.put_blob(&hash, b"v").await.unwrap());
        assert!(!store.put_blob(&hash, b"v").await.unwrap());
        assert_eq!(store.list_blobs().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_inserts_create_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = FsContentStore::open(dir.path(), "proj").await.unwrap();
        let second = FsContentStore::open(dir.path(), "proj").await.unwrap();

        for i in 0..32u32 {
            let body = format!("blob {i}").into_bytes();
            let hash = ContentHasher::hash(&body);
            let racers = [first.clone(), second.clone()].map(|store| {
                let body = body.clone();
                tokio::spawn(async move { store.put_blob(&hash, &body).await.unwrap() })
            });
            let mut created = 0;
            for racer in racers {
                if racer.await.unwrap() {
                    created += 1;
                }
            }
            assert_eq!(created, 1, "blob {i}");
        }
        let tmp_entries = std::fs::read_dir(dir.path().join("proj/tmp")).unwrap().count();
        assert_eq!(tmp_entries, 0);
        assert_eq!(first.list_blobs().await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn hash_mismatch_leaves_nothing_behind() {
        let (dir, store) = open_temp().await;
        let claimed = ContentHasher::hash(b"expected");
        assert!(matches!(
            store.put_blob(&claimed, b"actual").await,
            Err(StoreError::HashMismatch { .. })
        ));
        let tmp_entries = std::fs::read_dir(dir.path().join("proj/tmp")).unwrap().count();
        assert_eq!(tmp_entries, 0);
        assert!(store.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupted_object_is_detected_on_read() {
        let (dir, store) = open_temp().await;
        let hash = ContentHasher::hash(b"pristine");
        store.put_blob(&hash, b"pristine").await.unwrap();
        std::fs::write(dir.path().join("proj/blobs").join(hash.to_hex()), b"tampered").unwrap();
        assert!(matches!(
            store.get_blob(&hash).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn not_found_and_delete() {
        let (_dir, store) = open_temp().await;
        let hash = ContentHasher::hash(b"gone");
        assert!(matches!(
            store.get_blob(&hash).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(!store.delete_blob(&hash).await.unwrap());
        store.put_blob(&hash, b"gone").await.unwrap();
        assert!(store.delete_blob(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn listing_ignores_foreign_files() {
        let (dir, store) = open_temp().await;
        std::fs::write(dir.path().join("proj/blobs/README"), b"hi").unwrap();
        let hash = ContentHasher::hash(b"real");
        store.put_blob(&hash, b"real").await.unwrap();
        let listed = store.list_blobs().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash, hash);
        assert_eq!(listed[0].size, 4);
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsContentStore::open(dir.path(), "a").await.unwrap();
        let b = FsContentStore::open(dir.path(), "b").await.unwrap();
        let hash = ContentHasher::hash(b"only in a");
        a.put_blob(&hash, b"only in a").await.unwrap();
        assert!(!b.has_blob(&hash).await.unwrap());
    }
}
