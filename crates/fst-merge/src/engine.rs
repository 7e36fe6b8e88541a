//! Three-way manifest merge.

use std::time::Duration;

use tracing::{debug, info, warn};

use fst_manifest::{FileEntry, FileMode, Manifest};
use fst_store::{ContentStore, StoreError};

use crate::classify::{classify, Classification, Reason};
use crate::error::MergeResult;
use crate::line_merge;
use crate::plan::{ActionOrigin, AutoAction, Decision, DecisionOption, FileError, MergePlan, Resolution};
use crate::reconciler::{
    options_are_well_formed, ReconcileOption, ReconcileOutcome, ReconcileRequest, Reconciler,
    USE_CURRENT, USE_SOURCE,
};

/// Default size above which conflicts skip the reconciler.
pub const DEFAULT_RECONCILE_MAX_BYTES: u64 = 256 * 1024;
/// Default bound on a single reconciler call.
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning for [`MergeEngine`].
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Try a line-level merge of text conflicts before the reconciler.
    pub line_merge: bool,
    pub reconcile_max_bytes: u64,
    pub reconcile_timeout: Duration,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            line_merge: true,
            reconcile_max_bytes: DEFAULT_RECONCILE_MAX_BYTES,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }
}

/// Computes a [`MergePlan`] for pulling `source` into `current`.
pub struct MergeEngine<'a> {
    store: &'a dyn ContentStore,
    reconciler: &'a dyn Reconciler,
    options: MergeOptions,
}

/// Contents of a conflicting path, loaded from the store.
struct Contents {
    base: Option<Vec<u8>>,
    current: Vec<u8>,
    source: Vec<u8>,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn ContentStore, reconciler: &'a dyn Reconciler) -> Self {
        Self {
            store,
            reconciler,
            options: MergeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Classify every path and resolve what can be resolved without a human.
    ///
    /// Fails only on store errors other than a missing or corrupt blob;
    /// those become [`FileError`]s on the affected path.
    pub async fn plan(
        &self,
        base: &Manifest,
        current: &Manifest,
        source: &Manifest,
    ) -> MergeResult<MergePlan> {
        let mut plan = MergePlan::default();

        for (path, reason) in classify(base, current, source) {
            let b = base.get(&path);
            let c = current.get(&path);
            let s = source.get(&path);

            match (reason.classification(), s) {
                (Classification::Excluded, _) => plan.excluded_count += 1,
                (Classification::InSync, _) => plan.push_in_sync(&path, reason),
                (Classification::Apply, Some(s)) => plan.auto_actions.push(AutoAction {
                    path: path.clone(),
                    resolution: Resolution::from_entry(s),
                    origin: ActionOrigin::Source,
                    description: describe(reason).to_string(),
                }),
                (Classification::Conflict, Some(s)) => {
                    self.resolve_conflict(&mut plan, &path, reason, b, c, s).await?;
                }
                // Apply and Conflict always have a source entry.
                (Classification::Apply | Classification::Conflict, None) => {
                    plan.push_in_sync(&path, reason)
                }
            }
        }

        info!(
            auto = plan.auto_actions.len(),
            decisions = plan.decisions_needed.len(),
            in_sync = plan.in_sync_count(),
            excluded = plan.excluded_count,
            file_errors = plan.file_errors.len(),
            "merge planned"
        );
        Ok(plan)
    }

    async fn resolve_conflict(
        &self,
        plan: &mut MergePlan,
        path: &str,
        reason: Reason,
        base: Option<&FileEntry>,
        current: Option<&FileEntry>,
        source: &FileEntry,
    ) -> MergeResult<()> {
        let Some(current) = current else {
            // Deleted here, modified there: nothing to reconcile.
            plan.decisions_needed.push(fallback_decision(
                path,
                format!("{path} was deleted locally but changed in source"),
                None,
                source,
            ));
            return Ok(());
        };

        let contents = match self.load(path, base, current, source).await? {
            Ok(contents) => contents,
            Err(missing) => {
                warn!(path, error = %missing, "blob unavailable, copying from source");
                plan.file_errors.push(FileError {
                    path: path.to_string(),
                    message: missing.to_string(),
                });
                plan.auto_actions.push(AutoAction {
                    path: path.to_string(),
                    resolution: Resolution::from_entry(source),
                    origin: ActionOrigin::Source,
                    description: "copied from source; conflict could not be examined".into(),
                });
                return Ok(());
            }
        };

        let mode = merged_mode(base, current, source);
        let known = [Some(current), Some(source)];

        if self.options.line_merge {
            if let Some(base_bytes) = &contents.base {
                if let Some(merged) =
                    line_merge::merge_bytes(base_bytes, &contents.current, &contents.source)
                {
                    debug!(path, "line-level merge succeeded");
                    plan.auto_actions.push(AutoAction {
                        path: path.to_string(),
                        resolution: Resolution::from_bytes(merged, mode, &known),
                        origin: ActionOrigin::LineMerge,
                        description: "merged non-overlapping line changes".into(),
                    });
                    return Ok(());
                }
            }
        }

        let largest = contents.current.len().max(contents.source.len()) as u64;
        if largest > self.options.reconcile_max_bytes {
            debug!(path, size = largest, "too large to reconcile");
            plan.decisions_needed.push(fallback_decision(
                path,
                format!("{path} changed on both sides and is too large to combine automatically"),
                Some(current),
                source,
            ));
            return Ok(());
        }

        let request = ReconcileRequest {
            path,
            base: contents.base.as_deref(),
            current: &contents.current,
            source: &contents.source,
        };
        let outcome =
            match tokio::time::timeout(self.options.reconcile_timeout, self.reconciler.reconcile(request))
                .await
            {
                Ok(Ok(outcome)) => Some(outcome),
                Ok(Err(e)) => {
                    warn!(path, error = %e, "reconciler failed, falling back to manual decision");
                    None
                }
                Err(_) => {
                    warn!(
                        path,
                        timeout_secs = self.options.reconcile_timeout.as_secs(),
                        "reconciler timed out, falling back to manual decision"
                    );
                    None
                }
            };

        match outcome {
            Some(ReconcileOutcome::Compatible { content, description }) => {
                plan.auto_actions.push(AutoAction {
                    path: path.to_string(),
                    resolution: Resolution::from_bytes(content, mode, &known),
                    origin: ActionOrigin::Reconciler,
                    description,
                });
            }
            Some(ReconcileOutcome::Incompatible { reason: why, options })
                if options_are_well_formed(&options) =>
            {
                plan.decisions_needed.push(reconciled_decision(
                    path, why, options, mode, current, source,
                ));
            }
            Some(ReconcileOutcome::Incompatible { .. }) => {
                warn!(path, "reconciler returned malformed options, falling back to manual decision");
                plan.decisions_needed.push(fallback_decision(
                    path,
                    conflict_text(path, reason),
                    Some(current),
                    source,
                ));
            }
            None => plan.decisions_needed.push(fallback_decision(
                path,
                conflict_text(path, reason),
                Some(current),
                source,
            )),
        }
        Ok(())
    }

    /// Read the three versions. The inner `Err` is a per-file problem.
    async fn load(
        &self,
        path: &str,
        base: Option<&FileEntry>,
        current: &FileEntry,
        source: &FileEntry,
    ) -> MergeResult<Result<Contents, StoreError>> {
        let current_bytes = match recoverable(self.store.get_blob(&current.hash).await)? {
            Ok(bytes) => bytes,
            Err(e) => return Ok(Err(e)),
        };
        let source_bytes = match recoverable(self.store.get_blob(&source.hash).await)? {
            Ok(bytes) => bytes,
            Err(e) => return Ok(Err(e)),
        };
        let base_bytes = match base {
            Some(b) => match recoverable(self.store.get_blob(&b.hash).await)? {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!(path, error = %e, "base blob unavailable, merging without it");
                    None
                }
            },
            None => None,
        };
        Ok(Ok(Contents {
            base: base_bytes,
            current: current_bytes,
            source: source_bytes,
        }))
    }
}

/// Split store errors into per-file (inner) and fatal (outer).
fn recoverable(result: Result<Vec<u8>, StoreError>) -> MergeResult<Result<Vec<u8>, StoreError>> {
    match result {
        Ok(bytes) => Ok(Ok(bytes)),
        Err(e @ (StoreError::NotFound { .. } | StoreError::Corrupt { .. })) => Ok(Err(e)),
        Err(e) => Err(e.into()),
    }
}

/// Mode for combined content: whichever side changed it, current on a tie.
fn merged_mode(base: Option<&FileEntry>, current: &FileEntry, source: &FileEntry) -> FileMode {
    match base {
        Some(b) if b.mode == current.mode => source.mode,
        _ => current.mode,
    }
}

fn describe(reason: Reason) -> &'static str {
    match reason {
        Reason::AddedInSource => "added in source",
        Reason::ChangedInSource => "changed in source",
        _ => "taken from source",
    }
}

fn conflict_text(path: &str, reason: Reason) -> String {
    match reason {
        Reason::AddedInBoth => format!("{path} was added on both sides with different content"),
        _ => format!("{path} was changed on both sides"),
    }
}

/// The deterministic two-option decision. `current == None` means the
/// current side deleted the path.
pub fn fallback_decision(
    path: &str,
    reason: String,
    current: Option<&FileEntry>,
    source: &FileEntry,
) -> Decision {
    Decision {
        path: path.to_string(),
        reason,
        options: vec![
            DecisionOption {
                id: USE_SOURCE.into(),
                label: "Use source version".into(),
                resolution: Resolution::from_entry(source),
            },
            DecisionOption {
                id: USE_CURRENT.into(),
                label: match current {
                    Some(_) => "Keep current version".into(),
                    None => "Keep it deleted".into(),
                },
                resolution: current.map_or(Resolution::Delete, Resolution::from_entry),
            },
        ],
    }
}

fn reconciled_decision(
    path: &str,
    reason: String,
    options: Vec<ReconcileOption>,
    mode: FileMode,
    current: &FileEntry,
    source: &FileEntry,
) -> Decision {
    let known = [Some(current), Some(source)];
    let mut decision = Decision {
        path: path.to_string(),
        reason,
        options: options
            .into_iter()
            .map(|o| {
                let mode = match o.id.as_str() {
                    USE_SOURCE => source.mode,
                    USE_CURRENT => current.mode,
                    _ => mode,
                };
                DecisionOption {
                    resolution: Resolution::from_bytes(o.content, mode, &known),
                    id: o.id,
                    label: o.label,
                }
            })
            .collect(),
    };

    // The two plain choices are always on offer.
    for fallback in fallback_decision(path, String::new(), Some(current), source).options {
        if decision.option(&fallback.id).is_none() {
            decision.options.push(fallback);
        }
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fst_store::InMemoryContentStore;

    use crate::reconciler::{ManualReconciler, ReconcileError};

    // ------------------------------------------------------------------
    // Test reconcilers
    // ------------------------------------------------------------------

    struct Combine;

    #[async_trait]
    impl Reconciler for Combine {
        async fn reconcile(&self, r: ReconcileRequest<'_>) -> Result<ReconcileOutcome, ReconcileError> {
            let mut content = r.current.to_vec();
            content.extend_from_slice(r.source);
            Ok(ReconcileOutcome::Compatible {
                content,
                description: "concatenated".into(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Reconciler for Failing {
        async fn reconcile(&self, _: ReconcileRequest<'_>) -> Result<ReconcileOutcome, ReconcileError> {
            Err(ReconcileError::Unavailable("offline".into()))
        }
    }

    struct Malformed;

    #[async_trait]
    impl Reconciler for Malformed {
        async fn reconcile(&self, _: ReconcileRequest<'_>) -> Result<ReconcileOutcome, ReconcileError> {
            Ok(ReconcileOutcome::Incompatible {
                reason: "?".into(),
                options: vec![ReconcileOption {
                    id: "only".into(),
                    label: "only".into(),
                    content: Vec::new(),
                }],
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl Reconciler for Slow {
        async fn reconcile(&self, _: ReconcileRequest<'_>) -> Result<ReconcileOutcome, ReconcileError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ReconcileError::Failed("unreachable".into()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Reconciler for Counting {
        async fn reconcile(&self, r: ReconcileRequest<'_>) -> Result<ReconcileOutcome, ReconcileError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ManualReconciler.reconcile(r).await
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    async fn put(store: &InMemoryContentStore, path: &str, content: &[u8]) -> FileEntry {
        let entry = FileEntry::for_content(path, content, FileMode::REGULAR);
        store.put_blob(&entry.hash, content).await.unwrap();
        entry
    }

    fn m(entries: Vec<FileEntry>) -> Manifest {
        Manifest::from_entries(entries).unwrap()
    }

    fn no_line_merge() -> MergeOptions {
        MergeOptions {
            line_merge: false,
            ..MergeOptions::default()
        }
    }

    /// base H0, current H3, source H4 for `c.txt`.
    async fn conflicting(store: &InMemoryContentStore) -> (Manifest, Manifest, Manifest) {
        let base = put(store, "c.txt", b"line\n").await;
        let current = put(store, "c.txt", b"mine\n").await;
        let source = put(store, "c.txt", b"theirs\n").await;
        (m(vec![base]), m(vec![current]), m(vec![source]))
    }

    // ------------------------------------------------------------------
    // Classification into actions
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn added_in_source_is_applied() {
        let store = InMemoryContentStore::new();
        let a = put(&store, "a.txt", b"H1").await;
        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&Manifest::empty(), &Manifest::empty(), &m(vec![a.clone()]))
            .await
            .unwrap();

        assert_eq!(plan.auto_actions.len(), 1);
        assert_eq!(plan.auto_actions[0].path, "a.txt");
        assert_eq!(plan.auto_actions[0].resolution, Resolution::from_entry(&a));
        assert_eq!(plan.auto_actions[0].origin, ActionOrigin::Source);
        assert!(plan.decisions_needed.is_empty());
    }

    #[tokio::test]
    async fn local_changes_and_local_files_stay() {
        let store = InMemoryContentStore::new();
        let b0 = put(&store, "b.txt", b"H0").await;
        let b2 = put(&store, "b.txt", b"H2").await;
        let local = put(&store, "local.txt", b"only here").await;

        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&m(vec![b0.clone()]), &m(vec![b2, local]), &m(vec![b0]))
            .await
            .unwrap();

        assert!(plan.is_noop());
        assert_eq!(plan.in_sync, vec!["b.txt".to_string()]);
        assert_eq!(plan.excluded_count, 1);
    }

    #[tokio::test]
    async fn source_deletion_keeps_local_copy_and_is_reported() {
        let store = InMemoryContentStore::new();
        let f = put(&store, "old.txt", b"x").await;
        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&m(vec![f.clone()]), &m(vec![f]), &Manifest::empty())
            .await
            .unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.source_deletions_kept, vec!["old.txt".to_string()]);
    }

    #[tokio::test]
    async fn deletion_versus_modification_offers_delete() {
        let store = InMemoryContentStore::new();
        let base = put(&store, "d.txt", b"v1").await;
        let source = put(&store, "d.txt", b"v2").await;
        let counting = Counting::default();

        let plan = MergeEngine::new(&store, &counting)
            .plan(&m(vec![base]), &Manifest::empty(), &m(vec![source.clone()]))
            .await
            .unwrap();

        let decision = plan.decision("d.txt").unwrap();
        assert_eq!(
            decision.option(USE_SOURCE).unwrap().resolution,
            Resolution::from_entry(&source)
        );
        assert_eq!(decision.option(USE_CURRENT).unwrap().resolution, Resolution::Delete);
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    // ------------------------------------------------------------------
    // Conflict pipeline
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn non_overlapping_text_edits_auto_merge() {
        let store = InMemoryContentStore::new();
        let base = put(&store, "t.txt", b"a\nb\nc\nd\n").await;
        let current = put(&store, "t.txt", b"A\nb\nc\nd\n").await;
        let source = put(&store, "t.txt", b"a\nb\nc\nD\n").await;

        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&m(vec![base]), &m(vec![current]), &m(vec![source]))
            .await
            .unwrap();

        assert!(plan.decisions_needed.is_empty());
        let action = &plan.auto_actions[0];
        assert_eq!(action.origin, ActionOrigin::LineMerge);
        assert_eq!(
            action.resolution,
            Resolution::Content {
                bytes: b"A\nb\nc\nD\n".to_vec(),
                mode: FileMode::REGULAR
            }
        );
    }

    #[tokio::test]
    async fn manual_reconciler_yields_two_option_decision() {
        let store = InMemoryContentStore::new();
        let (base, current, source) = conflicting(&store).await;
        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&base, &current, &source)
            .await
            .unwrap();

        let decision = plan.decision("c.txt").unwrap();
        let ids: Vec<&str> = decision.option_ids().collect();
        assert_eq!(ids, vec![USE_SOURCE, USE_CURRENT]);
        assert_eq!(
            decision.option(USE_SOURCE).unwrap().resolution,
            Resolution::from_entry(source.get("c.txt").unwrap())
        );
        assert_eq!(
            decision.option(USE_CURRENT).unwrap().resolution,
            Resolution::from_entry(current.get("c.txt").unwrap())
        );
    }

    #[tokio::test]
    async fn compatible_result_becomes_auto_action() {
        let store = InMemoryContentStore::new();
        let (base, current, source) = conflicting(&store).await;
        let plan = MergeEngine::new(&store, &Combine)
            .plan(&base, &current, &source)
            .await
            .unwrap();

        assert!(plan.decisions_needed.is_empty());
        assert_eq!(plan.auto_actions[0].origin, ActionOrigin::Reconciler);
        assert_eq!(plan.auto_actions[0].description, "concatenated");
        assert_eq!(
            plan.auto_actions[0].resolution,
            Resolution::Content {
                bytes: b"mine\ntheirs\n".to_vec(),
                mode: FileMode::REGULAR
            }
        );
    }

    #[tokio::test]
    async fn failing_and_malformed_reconcilers_fall_back() {
        let store = InMemoryContentStore::new();
        let (base, current, source) = conflicting(&store).await;

        let reconcilers: [&dyn Reconciler; 2] = [&Failing, &Malformed];
        for reconciler in reconcilers {
            let plan = MergeEngine::new(&store, reconciler)
                .plan(&base, &current, &source)
                .await
                .unwrap();
            let ids: Vec<&str> = plan.decision("c.txt").unwrap().option_ids().collect();
            assert_eq!(ids, vec![USE_SOURCE, USE_CURRENT]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reconciler_times_out() {
        let store = InMemoryContentStore::new();
        let (base, current, source) = conflicting(&store).await;
        let options = MergeOptions {
            reconcile_timeout: Duration::from_secs(5),
            ..no_line_merge()
        };
        let plan = MergeEngine::new(&store, &Slow)
            .with_options(options)
            .plan(&base, &current, &source)
            .await
            .unwrap();
        assert_eq!(plan.decisions_needed.len(), 1);
    }

    #[tokio::test]
    async fn large_files_bypass_reconciler() {
        let store = InMemoryContentStore::new();
        let (base, current, source) = conflicting(&store).await;
        let counting = Counting::default();
        let options = MergeOptions {
            reconcile_max_bytes: 4,
            ..no_line_merge()
        };
        let plan = MergeEngine::new(&store, &counting)
            .with_options(options)
            .plan(&base, &current, &source)
            .await
            .unwrap();
        assert_eq!(plan.decisions_needed.len(), 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_blob_copies_from_source_with_file_error() {
        let store = InMemoryContentStore::new();
        let base = put(&store, "c.txt", b"base").await;
        let source = put(&store, "c.txt", b"theirs").await;
        // Current's blob was never stored.
        let current = FileEntry::for_content("c.txt", b"mine", FileMode::REGULAR);

        let plan = MergeEngine::new(&store, &ManualReconciler)
            .plan(&m(vec![base]), &m(vec![current]), &m(vec![source.clone()]))
            .await
            .unwrap();

        assert_eq!(plan.file_errors.len(), 1);
        assert_eq!(plan.file_errors[0].path, "c.txt");
        assert_eq!(plan.auto_actions[0].resolution, Resolution::from_entry(&source));
        assert!(plan.decisions_needed.is_empty());
    }

    #[test]
    fn reconciled_options_keep_plain_choices() {
        let current = FileEntry::for_content("x", b"mine", FileMode::REGULAR);
        let source = FileEntry::for_content("x", b"theirs", FileMode::REGULAR);
        let decision = reconciled_decision(
            "x",
            "differs".into(),
            vec![
                ReconcileOption {
                    id: "merged".into(),
                    label: "Merged".into(),
                    content: b"both".to_vec(),
                },
                ReconcileOption {
                    id: USE_SOURCE.into(),
                    label: "Theirs".into(),
                    content: b"theirs".to_vec(),
                },
            ],
            FileMode::REGULAR,
            &current,
            &source,
        );
        let ids: Vec<&str> = decision.option_ids().collect();
        assert_eq!(ids, vec!["merged", USE_SOURCE, USE_CURRENT]);
        assert_eq!(
            decision.option(USE_SOURCE).unwrap().resolution,
            Resolution::from_entry(&source)
        );
    }

    #[test]
    fn mode_follows_the_side_that_changed_it() {
        let base = FileEntry::for_content("s", b"0", FileMode::REGULAR);
        let cur = FileEntry::for_content("s", b"1", FileMode::REGULAR);
        let src = FileEntry::for_content("s", b"2", FileMode::EXECUTABLE);
        assert_eq!(merged_mode(Some(&base), &cur, &src), FileMode::EXECUTABLE);
        assert_eq!(merged_mode(Some(&base), &src, &cur), FileMode::EXECUTABLE);
        assert_eq!(merged_mode(None, &cur, &src), FileMode::REGULAR);
    }
}
