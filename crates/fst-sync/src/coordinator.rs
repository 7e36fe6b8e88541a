//! Prepare, execute, and undo syncs between workspaces.
//!
//! A sync pulls a source workspace (by default the project's main workspace)
//! into a target workspace:
//!
//! - **prepare** computes a three-way merge and caches it as a preview
//! - **execute** applies the preview plus the caller's decisions and moves
//!   the target's head with a single compare-and-swap
//! - **undo** points a head back at an earlier snapshot
//!
//! Everything execute writes before the compare-and-swap is either
//! content-addressed or an orphanable snapshot record, so the head update is
//! the one commit point. A failure before it rolls back the objects this
//! attempt created.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fst_dag::{resolve_merge_base, MergeBase, NewSnapshot, SnapshotSource, SnapshotStore};
use fst_manifest::{DriftReport, FileEntry, Manifest};
use fst_merge::{ManualReconciler, MergeEngine, Reconciler, Resolution};
use fst_refs::{CasOutcome, MergeRecord, Workspace, WorkspaceStore};
use fst_store::{
    garbage_collect, live_set, validate_manifest_integrity, ContentStore, GcSummary, LiveSet,
    StoreError,
};
use fst_types::{ContentHash, SnapshotId, Timestamp, WorkspaceId};

use crate::activity::{ActivityEvent, ActivityKind, ActivitySink, TracingActivitySink};
use crate::config::SyncConfig;
use crate::ephemeral::{EphemeralStore, InMemoryEphemeralStore};
use crate::error::{SyncError, SyncResult};
use crate::preview::{PreparedSync, SyncPreview, SyncState};
use crate::rollback::{RollbackContext, SnapshotReferences};

/// Chosen option id per conflicting path.
pub type Decisions = BTreeMap<String, String>;

/// Result of a committed sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub workspace_id: WorkspaceId,
    pub snapshot_id: SnapshotId,
    pub manifest_hash: ContentHash,
    pub version: u64,
    pub pre_sync_snapshot_id: Option<SnapshotId>,
    /// Paths whose entry changed.
    pub files_changed: usize,
    pub blobs_written: usize,
}

/// Result of an undo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub workspace_id: WorkspaceId,
    pub previous_head: Option<SnapshotId>,
    pub head: SnapshotId,
    pub version: u64,
}

/// How far a workspace has drifted from its sync source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub workspace_id: WorkspaceId,
    pub source_workspace_id: WorkspaceId,
    pub head: Option<SnapshotId>,
    pub source_head: Option<SnapshotId>,
    pub merge_base: MergeBase,
    /// Changes in the workspace relative to the source.
    pub drift: DriftReport,
}

impl SyncStatus {
    pub fn in_sync(&self) -> bool {
        !self.drift.has_drift()
    }
}

pub struct SyncCoordinator {
    content: Arc<dyn ContentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    previews: Arc<dyn EphemeralStore>,
    reconciler: Arc<dyn Reconciler>,
    activity: Arc<dyn ActivitySink>,
    config: SyncConfig,
    author: String,
}

impl SyncCoordinator {
    /// A coordinator with an in-memory preview cache, the manual
    /// reconciler, a `tracing` activity sink, and default configuration.
    pub fn new(
        content: Arc<dyn ContentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        workspaces: Arc<dyn WorkspaceStore>,
    ) -> Self {
        Self {
            content,
            snapshots,
            workspaces,
            previews: Arc::new(InMemoryEphemeralStore::new()),
            reconciler: Arc::new(ManualReconciler),
            activity: Arc::new(TracingActivitySink),
            config: SyncConfig::default(),
            author: "fst".into(),
        }
    }

    pub fn with_previews(mut self, previews: Arc<dyn EphemeralStore>) -> Self {
        self.previews = previews;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn ActivitySink>) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &dyn WorkspaceStore {
        self.workspaces.as_ref()
    }

    // ------------------------------------------------------------------
    // Prepare
    // ------------------------------------------------------------------

    /// Compute what syncing `source` (default: the project's main workspace)
    /// into `workspace_id` would do, and cache it for [`execute`].
    ///
    /// Writes nothing durable.
    ///
    /// [`execute`]: Self::execute
    pub async fn prepare(
        &self,
        workspace_id: &WorkspaceId,
        source: Option<&WorkspaceId>,
    ) -> SyncResult<SyncPreview> {
        let (target, source) = self.sync_pair(workspace_id, source).await?;

        let merge_base =
            resolve_merge_base(self.snapshots.as_ref(), &target, &source).await?;
        let (base_hash, base) = self.manifest_at(merge_base.snapshot_id).await?;
        let (current_hash, current) = self.manifest_at(target.head_snapshot_id).await?;
        let (source_hash, source_manifest) = self.manifest_at(source.head_snapshot_id).await?;

        let plan = MergeEngine::new(self.content.as_ref(), self.reconciler.as_ref())
            .with_options(self.config.merge_options())
            .plan(&base, &current, &source_manifest)
            .await?;

        let now = Timestamp::now();
        let preview = SyncPreview::from_plan(
            uuid::Uuid::now_v7().to_string(),
            target.project_id,
            target.id,
            source.id,
            merge_base,
            plan,
            now,
            now.plus(self.config.preview_ttl()),
        );
        let prepared = PreparedSync {
            preview: preview.clone(),
            current_head: target.head_snapshot_id,
            current_version: target.version,
            source_head: source.head_snapshot_id,
            base_manifest_hash: base_hash,
            current_manifest_hash: current_hash,
            source_manifest_hash: source_hash,
        };
        self.previews
            .put(&preview.id, prepared.to_bytes()?, self.config.preview_ttl())
            .await?;

        info!(
            state = %SyncState::Prepared,
            preview = %preview.id,
            workspace = %target.id.short_id(),
            source = %source.id.short_id(),
            merge_base = %merge_base.source,
            auto = preview.auto_actions.len(),
            decisions = preview.decisions_needed.len(),
            "sync prepared"
        );
        Ok(preview)
    }

    /// Read back a cached preview.
    pub async fn preview(&self, preview_id: &str) -> SyncResult<SyncPreview> {
        Ok(self.load_prepared(preview_id).await?.preview)
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    /// Apply a prepared sync.
    ///
    /// Every entry in the preview's `decisions_needed` must be answered in
    /// `decisions` with one of its option ids.
    pub async fn execute(
        &self,
        preview_id: &str,
        decisions: &Decisions,
    ) -> SyncResult<ExecuteOutcome> {
        let prepared = self.load_prepared(preview_id).await?;
        let preview = &prepared.preview;

        let resolutions = chosen_resolutions(preview, decisions)?;

        let workspace = self.workspaces.require_workspace(&preview.workspace_id).await?;
        let initial_version = workspace.version;
        if workspace.head_snapshot_id != prepared.current_head {
            info!(
                state = %SyncState::RolledBack,
                preview = %preview.id,
                workspace = %workspace.id.short_id(),
                "head moved since prepare"
            );
            self.discard_preview(preview_id).await;
            return Err(SyncError::ConcurrentModification {
                workspace: workspace.id,
                rollback_errors: Vec::new(),
            });
        }
        let source = self
            .workspaces
            .require_workspace(&preview.source_workspace_id)
            .await?;

        info!(
            state = %SyncState::Executing,
            preview = %preview.id,
            workspace = %workspace.id.short_id(),
            version = initial_version,
            "executing sync"
        );

        let pre_sync_snapshot_id = match (self.config.snapshot_before_sync, workspace.head_snapshot_id) {
            (true, Some(head)) => Some(self.write_pre_sync(&workspace, head, &prepared).await?),
            _ => None,
        };

        let mut rollback = RollbackContext::new();
        let committed = self
            .commit(&workspace, &source, &prepared, &resolutions, &mut rollback)
            .await;

        let (snapshot_id, manifest_hash, version, files_changed) = match committed {
            Ok(done) => done,
            Err(failure) => {
                let error = self
                    .roll_back(&workspace, rollback, failure.snapshot, failure.error)
                    .await;
                if matches!(error, SyncError::ConcurrentModification { .. }) {
                    self.discard_preview(preview_id).await;
                }
                return Err(error);
            }
        };

        if let Some(source_head) = prepared.source_head {
            let record = MergeRecord {
                last_merged_snapshot: source_head,
                merged_at: Timestamp::now(),
            };
            if let Err(e) = self
                .workspaces
                .record_merge(&workspace.id, &source.id, record)
                .await
            {
                warn!(workspace = %workspace.id.short_id(), error = %e, "failed to record merge history");
            }
        }
        self.discard_preview(preview_id).await;

        let outcome = ExecuteOutcome {
            workspace_id: workspace.id,
            snapshot_id,
            manifest_hash,
            version,
            pre_sync_snapshot_id,
            files_changed,
            blobs_written: rollback.blobs().len(),
        };
        self.record_activity(ActivityEvent {
            kind: ActivityKind::SyncCompleted,
            project_id: workspace.project_id,
            workspace_id: workspace.id,
            actor: self.author.clone(),
            snapshot_id,
            message: format!(
                "synced {} from {} ({} file(s) changed)",
                workspace.name, source.name, files_changed
            ),
            at: Timestamp::now(),
        })
        .await;

        info!(
            state = %SyncState::Committed,
            workspace = %workspace.id.short_id(),
            snapshot = %snapshot_id.short_hex(),
            version,
            files_changed,
            "sync committed"
        );
        Ok(outcome)
    }

    /// Every step of execute up to and including the head update.
    async fn commit(
        &self,
        workspace: &Workspace,
        source: &Workspace,
        prepared: &PreparedSync,
        resolutions: &[(String, Resolution)],
        rollback: &mut RollbackContext,
    ) -> Result<(SnapshotId, ContentHash, u64, usize), Failure> {
        let (_, current) = self
            .manifest_at(prepared.current_head)
            .await
            .map_err(Failure::before_snapshot)?;

        let mut files: BTreeMap<String, FileEntry> = current.to_map();
        let mut files_changed = 0;
        for (path, resolution) in resolutions {
            let before = files.get(path).cloned();
            match resolution.to_entry(path) {
                Some(entry) => {
                    if let Resolution::Content { bytes, .. } = resolution {
                        let created = self
                            .content
                            .put_blob(&entry.hash, bytes)
                            .await
                            .map_err(|e| Failure::before_snapshot(write_error(path, e)))?;
                        if created {
                            rollback.track_blob(entry.hash);
                        }
                    }
                    files.insert(path.clone(), entry);
                }
                None => {
                    files.remove(path);
                }
            }
            if files.get(path) != before.as_ref() {
                files_changed += 1;
            }
        }

        let merged = Manifest::from_map(files).map_err(|e| Failure::before_snapshot(e.into()))?;
        validate_manifest_integrity(self.content.as_ref(), &merged)
            .await
            .map_err(|e| Failure::before_snapshot(e.into()))?;

        let (manifest_hash, created) = self
            .content
            .write_manifest(&merged)
            .await
            .map_err(|e| Failure::before_snapshot(write_error("manifest", e)))?;
        if created {
            rollback.track_manifest(manifest_hash);
        }

        let snapshot = NewSnapshot::new(
            workspace.project_id,
            workspace.id,
            manifest_hash,
            SnapshotSource::Sync,
        )
        .parents(prepared.current_head.into_iter().chain(prepared.source_head))
        .author(self.author.clone())
        .summary(format!("sync from {}", source.name))
        .build();
        let snapshot_id = self
            .snapshots
            .write_snapshot(&snapshot)
            .await
            .map_err(|e| Failure::before_snapshot(SyncError::sync_failed(e.to_string())))?;

        let expected = prepared.current_version;
        let version = match self
            .workspaces
            .compare_and_swap_head(&workspace.id, expected, snapshot_id)
            .await
        {
            Ok(CasOutcome::Updated { version }) => version,
            Ok(CasOutcome::VersionMismatch { actual_version, .. }) => {
                debug!(expected, actual_version, "head update lost the race");
                return Err(Failure::after_snapshot(
                    snapshot_id,
                    SyncError::ConcurrentModification {
                        workspace: workspace.id,
                        rollback_errors: Vec::new(),
                    },
                ));
            }
            Err(e) => {
                return Err(Failure::after_snapshot(
                    snapshot_id,
                    SyncError::sync_failed(e.to_string()),
                ))
            }
        };

        let reread = self
            .workspaces
            .require_workspace(&workspace.id)
            .await
            .map_err(|e| Failure::after_snapshot(snapshot_id, e.into()))?;
        if reread.version != expected + 1 || reread.head_snapshot_id != Some(snapshot_id) {
            warn!(
                expected = expected + 1,
                actual = reread.version,
                "head changed right after update"
            );
            return Err(Failure::after_snapshot(
                snapshot_id,
                SyncError::ConcurrentModification {
                    workspace: workspace.id,
                    rollback_errors: Vec::new(),
                },
            ));
        }

        Ok((snapshot_id, manifest_hash, version, files_changed))
    }

    async fn roll_back(
        &self,
        workspace: &Workspace,
        rollback: RollbackContext,
        snapshot: Option<SnapshotId>,
        error: SyncError,
    ) -> SyncError {
        let tracked = rollback.blobs().len() + rollback.manifests().len();
        let keep = match self.protected_objects(&workspace.id, snapshot).await {
            Ok(keep) => keep,
            Err(e) => {
                warn!(error = %e, "cannot compute references; skipping rollback");
                return error.with_rollback_errors(vec![format!("rollback skipped: {e}")]);
            }
        };
        let errors = rollback.rollback(self.content.as_ref(), &keep).await;
        info!(
            state = %SyncState::RolledBack,
            workspace = %workspace.id.short_id(),
            objects = tracked,
            rollback_errors = errors.len(),
            error = %error,
            "sync rolled back"
        );
        error.with_rollback_errors(errors)
    }

    /// Objects a rollback must not delete: everything reachable from any
    /// snapshot except the one this attempt wrote, unless that snapshot has
    /// become the workspace head.
    async fn protected_objects(
        &self,
        workspace: &WorkspaceId,
        ours: Option<SnapshotId>,
    ) -> SyncResult<LiveSet> {
        let head = self.workspaces.require_workspace(workspace).await?.head_snapshot_id;
        let ignore = ours.filter(|id| Some(*id) != head);
        let refs = SnapshotReferences {
            snapshots: self.snapshots.as_ref(),
            ignore,
        };
        Ok(live_set(self.content.as_ref(), &refs).await?)
    }

    async fn write_pre_sync(
        &self,
        workspace: &Workspace,
        head: SnapshotId,
        prepared: &PreparedSync,
    ) -> SyncResult<SnapshotId> {
        let manifest_hash = match prepared.current_manifest_hash {
            Some(hash) => hash,
            None => self.snapshots.load_snapshot(&head).await?.manifest_hash,
        };
        let meta = NewSnapshot::new(
            workspace.project_id,
            workspace.id,
            manifest_hash,
            SnapshotSource::PreSync,
        )
        .parents([head])
        .author(self.author.clone())
        .summary("state before sync")
        .build();
        let id = self.snapshots.write_snapshot(&meta).await?;
        debug!(snapshot = %id.short_hex(), "recorded pre-sync snapshot");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Undo, status, gc
    // ------------------------------------------------------------------

    /// Point `workspace_id`'s head at `target`, unconditionally.
    pub async fn undo(
        &self,
        workspace_id: &WorkspaceId,
        target: &SnapshotId,
    ) -> SyncResult<UndoOutcome> {
        let workspace = self.workspaces.require_workspace(workspace_id).await?;
        let snapshot = self.snapshots.load_snapshot(target).await?;
        if snapshot.project_id != workspace.project_id {
            return Err(SyncError::InvalidOperation(format!(
                "snapshot {} belongs to another project",
                target.short_hex()
            )));
        }

        let version = self.workspaces.set_head(workspace_id, *target).await?;
        self.record_activity(ActivityEvent {
            kind: ActivityKind::UndoPerformed,
            project_id: workspace.project_id,
            workspace_id: workspace.id,
            actor: self.author.clone(),
            snapshot_id: *target,
            message: format!(
                "reset {} to {}",
                workspace.name,
                target.short_hex()
            ),
            at: Timestamp::now(),
        })
        .await;

        info!(
            state = %SyncState::Undone,
            workspace = %workspace.id.short_id(),
            head = %target.short_hex(),
            version,
            "head reset"
        );
        Ok(UndoOutcome {
            workspace_id: workspace.id,
            previous_head: workspace.head_snapshot_id,
            head: *target,
            version,
        })
    }

    /// Compare a workspace with its sync source.
    pub async fn status(
        &self,
        workspace_id: &WorkspaceId,
        source: Option<&WorkspaceId>,
    ) -> SyncResult<SyncStatus> {
        let (target, source) = self.sync_pair(workspace_id, source).await?;
        let merge_base = resolve_merge_base(self.snapshots.as_ref(), &target, &source).await?;
        let (_, current) = self.manifest_at(target.head_snapshot_id).await?;
        let (_, upstream) = self.manifest_at(source.head_snapshot_id).await?;
        Ok(SyncStatus {
            workspace_id: target.id,
            source_workspace_id: source.id,
            head: target.head_snapshot_id,
            source_head: source.head_snapshot_id,
            merge_base,
            drift: DriftReport::between(&upstream, &current),
        })
    }

    /// Collect objects no snapshot references, using the configured grace
    /// window and scan limit.
    pub async fn collect_garbage(&self, dry_run: bool) -> SyncResult<GcSummary> {
        let refs = SnapshotReferences {
            snapshots: self.snapshots.as_ref(),
            ignore: None,
        };
        Ok(garbage_collect(self.content.as_ref(), &refs, &self.config.gc_options(dry_run)).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Load and validate the target and source workspaces of a sync.
    async fn sync_pair(
        &self,
        workspace_id: &WorkspaceId,
        source: Option<&WorkspaceId>,
    ) -> SyncResult<(Workspace, Workspace)> {
        let target = self.workspaces.require_workspace(workspace_id).await?;
        let source_id = match source {
            Some(id) => *id,
            None => self
                .workspaces
                .get_project(&target.project_id)
                .await?
                .ok_or_else(|| SyncError::NotFound {
                    what: "project".into(),
                    id: target.project_id.to_string(),
                })?
                .main_workspace_id
                .ok_or_else(|| {
                    SyncError::InvalidOperation("project has no main workspace".into())
                })?,
        };
        if source_id == target.id {
            return Err(SyncError::InvalidOperation(
                "cannot sync a workspace with itself".into(),
            ));
        }
        let source = self.workspaces.require_workspace(&source_id).await?;
        if source.project_id != target.project_id {
            return Err(SyncError::InvalidOperation(
                "workspaces belong to different projects".into(),
            ));
        }
        Ok((target, source))
    }

    /// The manifest a snapshot points at; no snapshot means empty.
    async fn manifest_at(
        &self,
        snapshot: Option<SnapshotId>,
    ) -> SyncResult<(Option<ContentHash>, Manifest)> {
        let Some(id) = snapshot else {
            return Ok((None, Manifest::empty()));
        };
        let meta = self.snapshots.load_snapshot(&id).await?;
        let manifest = self.content.load_manifest(&meta.manifest_hash).await?;
        Ok((Some(meta.manifest_hash), manifest))
    }

    async fn load_prepared(&self, preview_id: &str) -> SyncResult<PreparedSync> {
        let bytes = self
            .previews
            .get(preview_id)
            .await?
            .ok_or_else(|| SyncError::PreviewExpired(preview_id.to_string()))?;
        let prepared = PreparedSync::from_bytes(&bytes)?;
        if prepared.preview.is_expired_at(&Timestamp::now()) {
            self.discard_preview(preview_id).await;
            return Err(SyncError::PreviewExpired(preview_id.to_string()));
        }
        Ok(prepared)
    }

    async fn discard_preview(&self, preview_id: &str) {
        if let Err(e) = self.previews.delete(preview_id).await {
            warn!(preview = preview_id, error = %e, "failed to delete preview");
        }
    }

    async fn record_activity(&self, event: ActivityEvent) {
        if let Err(e) = self.activity.record(&event).await {
            warn!(kind = %event.kind, error = %e, "activity sink failed");
        }
    }
}

/// An execute failure and, if one was written, the snapshot it produced.
struct Failure {
    snapshot: Option<SnapshotId>,
    error: SyncError,
}

impl Failure {
    fn before_snapshot(error: SyncError) -> Self {
        Self {
            snapshot: None,
            error,
        }
    }

    fn after_snapshot(snapshot: SnapshotId, error: SyncError) -> Self {
        Self {
            snapshot: Some(snapshot),
            error,
        }
    }
}

/// Hash problems stay fatal as themselves; anything else is a failed sync.
fn write_error(what: &str, e: StoreError) -> SyncError {
    match e {
        StoreError::HashMismatch { expected, computed } => SyncError::HashMismatch { expected, computed },
        other => SyncError::sync_failed(format!("writing {what}: {other}")),
    }
}

/// Pair every action with its final content: auto actions first, then the
/// chosen option of each decision.
fn chosen_resolutions(
    preview: &SyncPreview,
    decisions: &Decisions,
) -> SyncResult<Vec<(String, Resolution)>> {
    let mut missing = Vec::new();
    let mut out: Vec<(String, Resolution)> = preview
        .auto_actions
        .iter()
        .map(|a| (a.path.clone(), a.resolution.clone()))
        .collect();

    for decision in &preview.decisions_needed {
        match decisions
            .get(&decision.path)
            .and_then(|choice| decision.option(choice))
        {
            Some(option) => out.push((decision.path.clone(), option.resolution.clone())),
            None => missing.push(decision.path.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(SyncError::MissingDecisions { paths: missing });
    }

    let known: HashSet<&str> = preview.decisions_needed.iter().map(|d| d.path.as_str()).collect();
    for path in decisions.keys().filter(|p| !known.contains(p.as_str())) {
        debug!(path = %path, "ignoring decision for a path without a conflict");
    }
    Ok(out)
}
