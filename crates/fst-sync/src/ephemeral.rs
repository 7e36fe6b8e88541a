//! Short-lived key-value storage for prepared syncs.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use fst_types::Timestamp;

use crate::error::{SyncError, SyncResult};

/// A cache whose entries disappear after their TTL.
///
/// Expired entries must never be returned, whether or not they have been
/// physically removed yet.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SyncResult<()>;
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;
    /// Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> SyncResult<bool>;
}

/// Process-local cache driven by the tokio clock.
#[derive(Debug, Default)]
pub struct InMemoryEphemeralStore {
    entries: Mutex<HashMap<String, (Instant, Vec<u8>)>>,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, (Instant, Vec<u8>)>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::sync_failed("ephemeral store lock poisoned"))
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SyncResult<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.retain(|_, (expires, _)| *expires > now);
        entries.insert(key.to_string(), (now + ttl, value));
        Ok(())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((expires, value)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> SyncResult<bool> {
        let mut entries = self.lock()?;
        Ok(matches!(entries.remove(key), Some((expires, _)) if expires > Instant::now()))
    }
}

#[derive(Serialize, Deserialize)]
struct CachedEntry {
    expires_at: Timestamp,
    value: Vec<u8>,
}

/// One file per entry under a directory, for callers that do not outlive a
/// single command. Expiry uses wall-clock time.
#[derive(Clone, Debug)]
pub struct FsEphemeralStore {
    dir: PathBuf,
}

impl FsEphemeralStore {
    pub async fn open(dir: impl AsRef<Path>) -> SyncResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> SyncResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SyncError::InvalidOperation(format!("invalid cache key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.bin")))
    }

    async fn remove_file(path: &Path) -> SyncResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> SyncResult<usize> {
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let expired = match tokio::fs::read(&path).await {
                Ok(bytes) => match bincode::deserialize::<CachedEntry>(&bytes) {
                    Ok(entry) => entry.expires_at.is_before(&Timestamp::now()),
                    Err(_) => true,
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            if expired && Self::remove_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl EphemeralStore for FsEphemeralStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SyncResult<()> {
        let path = self.path_for(key)?;
        let entry = CachedEntry {
            expires_at: Timestamp::now().plus(ttl),
            value,
        };
        let bytes = bincode::serialize(&entry)?;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;
        debug!(key, "cached entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CachedEntry = bincode::deserialize(&bytes)?;
        if entry.expires_at.is_before(&Timestamp::now()) {
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn delete(&self, key: &str) -> SyncResult<bool> {
        let live = self.get(key).await?.is_some();
        Self::remove_file(&self.path_for(key)?).await?;
        Ok(live)
    }
}
