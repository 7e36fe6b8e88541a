use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fst_merge::MergeOptions;
use fst_store::{GcOptions, DEFAULT_EXISTS_BATCH_LIMIT};

use crate::error::{SyncError, SyncResult};

/// Tunables for the sync coordinator. Every field has a default, so an
/// empty TOML document is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a prepared preview stays executable.
    pub preview_ttl_secs: u64,
    /// Maximum hashes per existence query.
    pub exists_batch_limit: usize,
    /// Conflicting files larger than this skip the reconciler.
    pub reconcile_max_bytes: u64,
    pub reconcile_timeout_secs: u64,
    /// Objects younger than this are never garbage collected.
    pub gc_grace_secs: u64,
    /// Record the workspace head as a pre-sync snapshot before executing.
    pub snapshot_before_sync: bool,
    /// Attempt line-level merges of text conflicts.
    pub line_merge: bool,
    pub gc_scan_limit: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            preview_ttl_secs: 30 * 60,
            exists_batch_limit: DEFAULT_EXISTS_BATCH_LIMIT,
            reconcile_max_bytes: 256 * 1024,
            reconcile_timeout_secs: 60,
            gc_grace_secs: 60 * 60,
            snapshot_before_sync: true,
            line_merge: true,
            gc_scan_limit: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml(text: &str) -> SyncResult<Self> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> SyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Read a config file, falling back to defaults if it does not exist.
    pub async fn load(path: &Path) -> SyncResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn preview_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_ttl_secs)
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            line_merge: self.line_merge,
            reconcile_max_bytes: self.reconcile_max_bytes,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }

    pub fn gc_options(&self, dry_run: bool) -> GcOptions {
        GcOptions {
            dry_run,
            scan_limit: self.gc_scan_limit,
            grace: Duration::from_secs(self.gc_grace_secs),
        }
    }
}
