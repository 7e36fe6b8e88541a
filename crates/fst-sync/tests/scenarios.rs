//! End-to-end sync scenarios against in-memory and on-disk backends.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fst_crypto::ContentHasher;
use fst_dag::{
    resolve_merge_base, FsSnapshotStore, InMemorySnapshotStore, MergeBaseSource, NewSnapshot,
    SnapshotSource, SnapshotStore,
};
use fst_manifest::{FileEntry, FileMode, Manifest};
use fst_merge::{ActionOrigin, Resolution, USE_CURRENT, USE_SOURCE};
use fst_refs::{
    CasOutcome, FsWorkspaceStore, InMemoryWorkspaceStore, MergeRecord, ProjectInfo, Result as RefResult,
    Workspace, WorkspaceStore,
};
use fst_store::{ContentStore, FsContentStore, InMemoryContentStore};
use fst_sync::{
    ActivityKind, Decisions, FsEphemeralStore, InMemoryActivityLog, SyncConfig, SyncCoordinator,
    SyncError,
};
use fst_types::{ProjectId, SnapshotId, Timestamp, WorkspaceId};

// ----------------------------------------------------------------------
// Fixture
// ----------------------------------------------------------------------

struct World {
    content: Arc<dyn ContentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    activity: Arc<InMemoryActivityLog>,
    project: ProjectInfo,
    main: WorkspaceId,
    clock: AtomicI64,
}

impl World {
    async fn in_memory() -> Self {
        Self::with_stores(
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryWorkspaceStore::new()),
        )
        .await
    }

    async fn with_stores(
        content: Arc<dyn ContentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        workspaces: Arc<dyn WorkspaceStore>,
    ) -> Self {
        let mut project = ProjectInfo::new("demo");
        let main = Workspace::new(project.id, "main");
        workspaces.create_workspace(&main).await.unwrap();
        project.main_workspace_id = Some(main.id);
        workspaces.put_project(&project).await.unwrap();

        Self {
            content,
            snapshots,
            workspaces,
            activity: Arc::new(InMemoryActivityLog::new()),
            project,
            main: main.id,
            clock: AtomicI64::new(Timestamp::now().as_millis()),
        }
    }

    fn coordinator(&self) -> SyncCoordinator {
        SyncCoordinator::new(
            self.content.clone(),
            self.snapshots.clone(),
            self.workspaces.clone(),
        )
        .with_activity(self.activity.clone())
        .with_author("tester")
    }

    async fn workspace(&self, id: &WorkspaceId) -> Workspace {
        self.workspaces.require_workspace(id).await.unwrap()
    }

    /// Replace a workspace's tree with `files` and advance its head.
    async fn commit(&self, id: &WorkspaceId, files: &[(&str, &[u8])]) -> SnapshotId {
        let ws = self.workspace(id).await;
        let mut builder = Manifest::builder();
        for (path, content) in files {
            let entry = FileEntry::for_content(*path, content, FileMode::REGULAR);
            self.content.put_blob(&entry.hash, content).await.unwrap();
            builder.insert(entry).unwrap();
        }
        let (manifest_hash, _) = self.content.write_manifest(&builder.build()).await.unwrap();

        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = NewSnapshot::new(ws.project_id, ws.id, manifest_hash, SnapshotSource::Local)
            .parents(ws.head_snapshot_id)
            .author("tester")
            .created_at(Timestamp::from_millis(tick))
            .build();
        let snapshot = self.snapshots.write_snapshot(&meta).await.unwrap();
        let outcome = self
            .workspaces
            .compare_and_swap_head(&ws.id, ws.version, snapshot)
            .await
            .unwrap();
        assert!(outcome.is_updated());
        snapshot
    }

    async fn fork(&self, from: &WorkspaceId, name: &str) -> WorkspaceId {
        let source = self.workspace(from).await;
        let ws = Workspace::forked_from(&source, name);
        self.workspaces.create_workspace(&ws).await.unwrap();
        ws.id
    }

    async fn manifest(&self, id: &WorkspaceId) -> Manifest {
        let head = self.workspace(id).await.head_snapshot_id.unwrap();
        let meta = self.snapshots.load_snapshot(&head).await.unwrap();
        self.content.load_manifest(&meta.manifest_hash).await.unwrap()
    }
}

fn hash_of(content: &[u8]) -> fst_types::ContentHash {
    ContentHasher::hash(content)
}

fn choose(path: &str, option: &str) -> Decisions {
    Decisions::from([(path.to_string(), option.to_string())])
}

// ----------------------------------------------------------------------
// Source adds a file
// ----------------------------------------------------------------------

#[tokio::test]
async fn source_addition_is_applied() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[]).await;
    let feature = world.fork(&world.main, "feature").await;
    let main_head = world.commit(&world.main, &[("a.txt", b"H1")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    assert_eq!(preview.project_id, world.project.id);
    assert_eq!(preview.merge_base.source, MergeBaseSource::TargetForkedFromSource);
    assert_eq!(preview.auto_actions.len(), 1);
    assert_eq!(preview.auto_actions[0].path, "a.txt");
    assert!(preview.decisions_needed.is_empty());

    let before = world.workspace(&feature).await.version;
    let outcome = coordinator.execute(&preview.id, &Decisions::new()).await.unwrap();
    assert_eq!(outcome.version, before + 1);
    assert_eq!(outcome.files_changed, 1);
    assert!(outcome.pre_sync_snapshot_id.is_some());

    let after = world.workspace(&feature).await;
    assert_eq!(after.version, before + 1);
    assert_eq!(after.head_snapshot_id, Some(outcome.snapshot_id));
    assert_eq!(after.last_merged_from(&world.main), Some(main_head));

    let manifest = world.manifest(&feature).await;
    assert_eq!(manifest.get("a.txt").unwrap().hash, hash_of(b"H1"));

    let merge = world.snapshots.load_snapshot(&outcome.snapshot_id).await.unwrap();
    assert_eq!(merge.source, SnapshotSource::Sync);
    assert!(merge.parent_snapshot_ids.contains(&main_head));

    // The preview is consumed.
    assert!(matches!(
        coordinator.execute(&preview.id, &Decisions::new()).await,
        Err(SyncError::PreviewExpired(_))
    ));

    let kinds: Vec<ActivityKind> = world.activity.events().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::SyncCompleted]);
}

// ----------------------------------------------------------------------
// Local change, untouched in source
// ----------------------------------------------------------------------

#[tokio::test]
async fn local_change_is_in_sync() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("b.txt", b"H0")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("b.txt", b"H2")]).await;

    let preview = world.coordinator().prepare(&feature, None).await.unwrap();
    assert!(preview.auto_actions.is_empty());
    assert!(preview.decisions_needed.is_empty());
    assert_eq!(preview.in_sync_count, 1);
}

// ----------------------------------------------------------------------
// Both sides change a file
// ----------------------------------------------------------------------

#[tokio::test]
async fn conflict_requires_a_decision() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("c.txt", b"base\n")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("c.txt", b"current\n")]).await;
    world.commit(&world.main, &[("c.txt", b"source\n")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    let decision = preview.decision("c.txt").unwrap();
    let ids: Vec<&str> = decision.option_ids().collect();
    assert!(ids.contains(&USE_SOURCE) && ids.contains(&USE_CURRENT));

    match coordinator.execute(&preview.id, &Decisions::new()).await {
        Err(SyncError::MissingDecisions { paths }) => assert_eq!(paths, vec!["c.txt".to_string()]),
        other => panic!("expected MissingDecisions, got {other:?}"),
    }

    // The preview survives a missing decision.
    coordinator
        .execute(&preview.id, &choose("c.txt", USE_SOURCE))
        .await
        .unwrap();
    assert_eq!(
        world.manifest(&feature).await.get("c.txt").unwrap().hash,
        hash_of(b"source\n")
    );
}

#[tokio::test]
async fn non_overlapping_edits_merge_without_asking() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("t.txt", b"a\nb\nc\nd\n")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("t.txt", b"A\nb\nc\nd\n")]).await;
    world.commit(&world.main, &[("t.txt", b"a\nb\nc\nD\n")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    assert_eq!(preview.auto_actions[0].origin, ActionOrigin::LineMerge);

    let outcome = coordinator.execute(&preview.id, &Decisions::new()).await.unwrap();
    assert_eq!(outcome.blobs_written, 1);
    assert_eq!(
        world.manifest(&feature).await.get("t.txt").unwrap().hash,
        hash_of(b"A\nb\nc\nD\n")
    );
}

#[tokio::test]
async fn keeping_a_local_deletion() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("d.txt", b"v1"), ("keep.txt", b"k")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("keep.txt", b"k")]).await;
    world.commit(&world.main, &[("d.txt", b"v2"), ("keep.txt", b"k")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    assert_eq!(
        preview.decision("d.txt").unwrap().option(USE_CURRENT).unwrap().resolution,
        Resolution::Delete
    );

    coordinator
        .execute(&preview.id, &choose("d.txt", USE_CURRENT))
        .await
        .unwrap();
    let manifest = world.manifest(&feature).await;
    assert!(manifest.get("d.txt").is_none());
    assert!(manifest.get("keep.txt").is_some());
}

// ----------------------------------------------------------------------
// Concurrent executes
// ----------------------------------------------------------------------

#[tokio::test]
async fn concurrent_executes_have_one_winner() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&world.main, &[("a.txt", b"H1")]).await;

    let coordinator = world.coordinator();
    let first = coordinator.prepare(&feature, None).await.unwrap();
    let second = coordinator.prepare(&feature, None).await.unwrap();
    let initial = world.workspace(&feature).await.version;

    let none = Decisions::new();
    let (a, b) = tokio::join!(
        coordinator.execute(&first.id, &none),
        coordinator.execute(&second.id, &none)
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(SyncError::ConcurrentModification { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(world.workspace(&feature).await.version, initial + 1);
}

/// Yields before every call so two executes interleave all the way to the
/// compare-and-swap.
struct Interleaving(Arc<dyn WorkspaceStore>);

#[async_trait]
impl WorkspaceStore for Interleaving {
    async fn put_project(&self, project: &ProjectInfo) -> RefResult<()> {
        tokio::task::yield_now().await;
        self.0.put_project(project).await
    }

    async fn get_project(&self, id: &ProjectId) -> RefResult<Option<ProjectInfo>> {
        tokio::task::yield_now().await;
        self.0.get_project(id).await
    }

    async fn create_workspace(&self, workspace: &Workspace) -> RefResult<()> {
        tokio::task::yield_now().await;
        self.0.create_workspace(workspace).await
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> RefResult<Option<Workspace>> {
        tokio::task::yield_now().await;
        self.0.get_workspace(id).await
    }

    async fn list_workspaces(&self, project: &ProjectId) -> RefResult<Vec<Workspace>> {
        tokio::task::yield_now().await;
        self.0.list_workspaces(project).await
    }

    async fn compare_and_swap_head(
        &self,
        id: &WorkspaceId,
        expected_version: u64,
        new_head: SnapshotId,
    ) -> RefResult<CasOutcome> {
        tokio::task::yield_now().await;
        self.0.compare_and_swap_head(id, expected_version, new_head).await
    }

    async fn set_head(&self, id: &WorkspaceId, new_head: SnapshotId) -> RefResult<u64> {
        tokio::task::yield_now().await;
        self.0.set_head(id, new_head).await
    }

    async fn record_merge(
        &self,
        id: &WorkspaceId,
        source: &WorkspaceId,
        record: MergeRecord,
    ) -> RefResult<()> {
        tokio::task::yield_now().await;
        self.0.record_merge(id, source, record).await
    }
}

#[tokio::test]
async fn lost_compare_and_swap_rolls_back_and_keeps_winner_intact() {
    let world = World::with_stores(
        Arc::new(InMemoryContentStore::new()),
        Arc::new(InMemorySnapshotStore::new()),
        Arc::new(Interleaving(Arc::new(InMemoryWorkspaceStore::new()))),
    )
    .await;
    world.commit(&world.main, &[("t.txt", b"a\nb\nc\nd\n")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("t.txt", b"A\nb\nc\nd\n")]).await;
    world.commit(&world.main, &[("t.txt", b"a\nb\nc\nD\n")]).await;

    let coordinator = world.coordinator();
    let first = coordinator.prepare(&feature, None).await.unwrap();
    let second = coordinator.prepare(&feature, None).await.unwrap();
    let initial = world.workspace(&feature).await.version;

    let none = Decisions::new();
    let (a, b) = tokio::join!(
        coordinator.execute(&first.id, &none),
        coordinator.execute(&second.id, &none)
    );
    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(loser.is_retryable());
    assert!(matches!(loser, SyncError::ConcurrentModification { .. }));

    let after = world.workspace(&feature).await;
    assert_eq!(after.version, initial + 1);
    assert_eq!(after.head_snapshot_id, Some(winner.snapshot_id));

    // Everything the winner's manifest references is still stored.
    let manifest = world.manifest(&feature).await;
    fst_store::validate_manifest_integrity(world.content.as_ref(), &manifest)
        .await
        .unwrap();
}

// ----------------------------------------------------------------------
// Merge history short-circuits the heuristics
// ----------------------------------------------------------------------

#[tokio::test]
async fn merge_history_is_the_merge_base() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("x", b"0")]).await;
    let a = world.fork(&world.main, "a").await;
    let b = world.fork(&world.main, "b").await;
    let mut s5 = SnapshotId::from_bytes([0; 32]);
    for i in 1..=5u8 {
        s5 = world.commit(&b, &[("x", &[i])]).await;
    }
    world
        .workspaces
        .record_merge(
            &a,
            &b,
            MergeRecord {
                last_merged_snapshot: s5,
                merged_at: Timestamp::now(),
            },
        )
        .await
        .unwrap();

    let target = world.workspace(&a).await;
    let source = world.workspace(&b).await;
    let base = resolve_merge_base(world.snapshots.as_ref(), &target, &source)
        .await
        .unwrap();
    assert_eq!(base.snapshot_id, Some(s5));
    assert_eq!(base.source, MergeBaseSource::MergeHistory);

    let status = world.coordinator().status(&a, Some(&b)).await.unwrap();
    assert_eq!(status.merge_base.snapshot_id, Some(s5));
}

// ----------------------------------------------------------------------
// Failure handling
// ----------------------------------------------------------------------

#[tokio::test]
async fn failed_execute_leaves_nothing_referenced() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[("t.txt", b"a\nb\nc\nd\n")]).await;
    let feature = world.fork(&world.main, "feature").await;
    let feature_head = world.commit(&feature, &[("t.txt", b"A\nb\nc\nd\n")]).await;
    world
        .commit(&world.main, &[("t.txt", b"a\nb\nc\nD\n"), ("x.txt", b"new")])
        .await;

    let coordinator = world.coordinator().with_config(SyncConfig {
        gc_grace_secs: 0,
        ..SyncConfig::default()
    });
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    let merged = hash_of(b"A\nb\nc\nD\n");

    // The source's new blob vanishes between prepare and execute.
    world.content.delete_blob(&hash_of(b"new")).await.unwrap();
    let before = world.workspace(&feature).await;

    match coordinator.execute(&preview.id, &Decisions::new()).await {
        Err(SyncError::ManifestInvalid { missing, .. }) => assert_eq!(missing, vec![hash_of(b"new")]),
        other => panic!("expected ManifestInvalid, got {other:?}"),
    }

    let after = world.workspace(&feature).await;
    assert_eq!(after.head_snapshot_id, Some(feature_head));
    assert_eq!(after.version, before.version);

    let gc = coordinator.collect_garbage(true).await.unwrap();
    let stored = world.content.has_blob(&merged).await.unwrap();
    assert!(!stored || gc.orphaned_hashes.contains(&merged));

    // A failed execute keeps the preview for inspection.
    assert!(coordinator.preview(&preview.id).await.is_ok());
}

#[tokio::test]
async fn head_moved_since_prepare() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&world.main, &[("a.txt", b"H1")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    world.commit(&feature, &[("local.txt", b"L")]).await;

    let err = coordinator
        .execute(&preview.id, &Decisions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConcurrentModification { .. }));
    assert_eq!(err.user_hint(), Some("the workspace changed underneath this sync; re-run prepare"));
    assert!(matches!(
        coordinator.preview(&preview.id).await,
        Err(SyncError::PreviewExpired(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn stale_previews_never_apply() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&world.main, &[("a.txt", b"H1")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    let version = world.workspace(&feature).await.version;

    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    let err = coordinator
        .execute(&preview.id, &Decisions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PreviewExpired(_)));
    assert!(err.is_retryable());
    assert_eq!(world.workspace(&feature).await.version, version);
}

#[tokio::test]
async fn invalid_pairs_are_rejected() {
    let world = World::in_memory().await;
    let coordinator = world.coordinator();

    let err = coordinator.prepare(&world.main, None).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidOperation(_)));

    let stranger = Workspace::new(ProjectId::new(), "stranger");
    world.workspaces.create_workspace(&stranger).await.unwrap();
    let err = coordinator.prepare(&world.main, Some(&stranger.id)).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidOperation(_)));

    let err = coordinator.prepare(&WorkspaceId::new(), None).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

// ----------------------------------------------------------------------
// Undo
// ----------------------------------------------------------------------

#[tokio::test]
async fn undo_repoints_the_head() {
    let world = World::in_memory().await;
    let origin = world.commit(&world.main, &[]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&world.main, &[("a.txt", b"H1")]).await;

    let coordinator = world.coordinator();
    let preview = coordinator.prepare(&feature, None).await.unwrap();
    let synced = coordinator.execute(&preview.id, &Decisions::new()).await.unwrap();

    let undo = coordinator.undo(&feature, &origin).await.unwrap();
    assert_eq!(undo.previous_head, Some(synced.snapshot_id));
    assert_eq!(undo.version, synced.version + 1);
    assert_eq!(world.workspace(&feature).await.head_snapshot_id, Some(origin));
    assert!(world.manifest(&feature).await.is_empty());

    let kinds: Vec<ActivityKind> = world.activity.events().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::SyncCompleted, ActivityKind::UndoPerformed]);

    let err = coordinator
        .undo(&feature, &SnapshotId::from_bytes([0xee; 32]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test]
async fn undo_rejects_foreign_snapshots() {
    let world = World::in_memory().await;
    world.commit(&world.main, &[]).await;

    let foreign = NewSnapshot::new(
        ProjectId::new(),
        WorkspaceId::new(),
        world.content.write_manifest(&Manifest::empty()).await.unwrap().0,
        SnapshotSource::Import,
    )
    .build();
    let foreign_id = world.snapshots.write_snapshot(&foreign).await.unwrap();

    let err = world.coordinator().undo(&world.main, &foreign_id).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidOperation(_)));
}

// ----------------------------------------------------------------------
// On-disk backends
// ----------------------------------------------------------------------

#[tokio::test]
async fn full_cycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let world = World::with_stores(
        Arc::new(FsContentStore::open(root, "demo").await.unwrap()),
        Arc::new(FsSnapshotStore::open(root, "demo").await.unwrap()),
        Arc::new(FsWorkspaceStore::open(root, "demo").await.unwrap()),
    )
    .await;
    let previews = Arc::new(FsEphemeralStore::open(root.join("demo").join("previews")).await.unwrap());

    world.commit(&world.main, &[("readme.md", b"# demo\n")]).await;
    let feature = world.fork(&world.main, "feature").await;
    world.commit(&feature, &[("readme.md", b"# demo\n"), ("notes.txt", b"mine")]).await;
    world
        .commit(&world.main, &[("readme.md", b"# demo v2\n"), ("lib.rs", b"fn main() {}\n")])
        .await;

    let coordinator = world.coordinator().with_previews(previews);
    let status = coordinator.status(&feature, None).await.unwrap();
    assert!(!status.in_sync());

    let preview = coordinator.prepare(&feature, None).await.unwrap();
    assert_eq!(preview.auto_actions.len(), 2);
    assert_eq!(preview.excluded_count, 1);

    // A fresh coordinator over the same directory can execute it.
    let coordinator = world.coordinator().with_previews(Arc::new(
        FsEphemeralStore::open(root.join("demo").join("previews")).await.unwrap(),
    ));
    coordinator.execute(&preview.id, &Decisions::new()).await.unwrap();

    let manifest = world.manifest(&feature).await;
    let paths: Vec<&str> = manifest.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["lib.rs", "notes.txt", "readme.md"]);
    assert_eq!(manifest.get("readme.md").unwrap().hash, hash_of(b"# demo v2\n"));

    let status = coordinator.status(&feature, None).await.unwrap();
    assert_eq!(status.drift.added, vec!["notes.txt".to_string()]);
    assert!(status.drift.modified.is_empty());
}
