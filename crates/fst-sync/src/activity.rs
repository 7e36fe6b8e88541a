//! Append-only operation records.
//!
//! Sinks are fire-and-forget from the coordinator's point of view: a failed
//! `record` is logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use fst_types::{ProjectId, SnapshotId, Timestamp, WorkspaceId};

use crate::error::{SyncError, SyncResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SyncCompleted,
    UndoPerformed,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyncCompleted => f.write_str("sync_completed"),
            Self::UndoPerformed => f.write_str("undo_performed"),
        }
    }
}

/// A human-readable record of something that changed a workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub actor: String,
    /// The head after the operation.
    pub snapshot_id: SnapshotId,
    pub message: String,
    pub at: Timestamp,
}

#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, event: &ActivityEvent) -> SyncResult<()>;
}

/// Emits each event as a `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingActivitySink;

#[async_trait]
impl ActivitySink for TracingActivitySink {
    async fn record(&self, event: &ActivityEvent) -> SyncResult<()> {
        info!(
            kind = %event.kind,
            workspace = %event.workspace_id.short_id(),
            snapshot = %event.snapshot_id.short_hex(),
            actor = %event.actor,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Keeps events in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    events: Mutex<Vec<ActivityEvent>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ActivitySink for InMemoryActivityLog {
    async fn record(&self, event: &ActivityEvent) -> SyncResult<()> {
        self.events
            .lock()
            .map_err(|_| SyncError::sync_failed("activity log lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlActivityLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event back, oldest first. A missing file is an empty log.
    pub async fn read_all(&self) -> SyncResult<Vec<ActivityEvent>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SyncError::from))
            .collect()
    }
}

#[async_trait]
impl ActivitySink for JsonlActivityLog {
    async fn record(&self, event: &ActivityEvent) -> SyncResult<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
