use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fst_types::{ContentHash, Timestamp};

use crate::error::{ObjectKind, StoreError, StoreResult};
use crate::traits::{ContentStore, ObjectInfo};

/// Supplies the GC roots: every manifest hash referenced by a snapshot.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn referenced_manifests(&self) -> StoreResult<Vec<ContentHash>>;
}

/// Knobs for one collection pass.
#[derive(Clone, Debug)]
pub struct GcOptions {
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
    /// Examine at most this many objects of each kind (in hash order).
    pub scan_limit: Option<usize>,
    /// Objects stored more recently than this are never collected.
    pub grace: Duration,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            scan_limit: None,
            grace: Duration::from_secs(3600),
        }
    }
}

/// Outcome of a collection pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcSummary {
    /// Objects examined (blobs and manifests).
    pub scanned: usize,
    /// Unreferenced blobs deleted (or that would be, on a dry run).
    pub orphaned: usize,
    pub orphaned_hashes: Vec<ContentHash>,
    /// Unreferenced manifests deleted (or that would be).
    pub orphaned_manifests: Vec<ContentHash>,
    pub freed_bytes: u64,
    /// Unreferenced objects left alone because they are inside the grace window.
    pub skipped_recent: usize,
}

/// Every object reachable from a [`ReferenceSource`].
#[derive(Clone, Debug, Default)]
pub struct LiveSet {
    pub manifests: HashSet<ContentHash>,
    pub blobs: HashSet<ContentHash>,
}

impl LiveSet {
    pub fn contains(&self, kind: ObjectKind, hash: &ContentHash) -> bool {
        match kind {
            ObjectKind::Blob => self.blobs.contains(hash),
            ObjectKind::Manifest => self.manifests.contains(hash),
        }
    }
}

/// Compute the live set: referenced manifests and every blob they list.
/// A referenced manifest that is missing contributes nothing.
pub async fn live_set(store: &dyn ContentStore, refs: &dyn ReferenceSource) -> StoreResult<LiveSet> {
    let mut live = LiveSet::default();
    for hash in refs.referenced_manifests().await? {
        if !live.manifests.insert(hash) {
            continue;
        }
        match store.load_manifest(&hash).await {
            Ok(manifest) => live.blobs.extend(manifest.iter().map(|f| f.hash)),
            Err(StoreError::NotFound { .. }) => {
                warn!(manifest = %hash.short_hex(), "snapshot references missing manifest");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(live)
}

fn candidates(
    objects: Vec<ObjectInfo>,
    live: &HashSet<ContentHash>,
    cutoff: &Timestamp,
    scan_limit: Option<usize>,
    summary: &mut GcSummary,
) -> Vec<ObjectInfo> {
    let limit = scan_limit.unwrap_or(usize::MAX);
    let mut out = Vec::new();
    for info in objects.into_iter().take(limit) {
        summary.scanned += 1;
        if live.contains(&info.hash) {
            continue;
        }
        if cutoff.is_before(&info.stored_at) {
            summary.skipped_recent += 1;
            continue;
        }
        out.push(info);
    }
    out
}

/// Mark-and-sweep collection of unreferenced blobs and manifests.
///
/// The reference set is computed once to pick candidates and again just
/// before deleting; an object referenced by either pass survives. Together
/// with the grace window this keeps objects written by an in-flight sync
/// (whose snapshot does not exist yet) safe.
pub async fn garbage_collect(
    store: &dyn ContentStore,
    refs: &dyn ReferenceSource,
    options: &GcOptions,
) -> StoreResult<GcSummary> {
    let cutoff = Timestamp::now().minus(options.grace);
    let mut summary = GcSummary::default();

    let live = live_set(store, refs).await?;
    let blobs = candidates(
        store.list(ObjectKind::Blob).await?,
        &live.blobs,
        &cutoff,
        options.scan_limit,
        &mut summary,
    );
    let manifests = candidates(
        store.list(ObjectKind::Manifest).await?,
        &live.manifests,
        &cutoff,
        options.scan_limit,
        &mut summary,
    );

    if options.dry_run {
        summary.orphaned = blobs.len();
        summary.freed_bytes = blobs.iter().chain(&manifests).map(|i| i.size).sum();
        summary.orphaned_hashes = blobs.into_iter().map(|i| i.hash).collect();
        summary.orphaned_manifests = manifests.into_iter().map(|i| i.hash).collect();
        info!(
            scanned = summary.scanned,
            orphaned = summary.orphaned,
            freed_bytes = summary.freed_bytes,
            "gc dry run complete"
        );
        return Ok(summary);
    }

    let recheck = live_set(store, refs).await?;
    for info in blobs {
        if recheck.blobs.contains(&info.hash) {
            debug!(hash = %info.hash.short_hex(), "blob became referenced during gc");
            continue;
        }
        if store.remove(ObjectKind::Blob, &info.hash).await? {
            summary.orphaned += 1;
            summary.freed_bytes += info.size;
            summary.orphaned_hashes.push(info.hash);
        }
    }
    for info in manifests {
        if recheck.manifests.contains(&info.hash) {
            continue;
        }
        if store.remove(ObjectKind::Manifest, &info.hash).await? {
            summary.freed_bytes += info.size;
            summary.orphaned_manifests.push(info.hash);
        }
    }

    info!(
        scanned = summary.scanned,
        orphaned = summary.orphaned,
        manifests = summary.orphaned_manifests.len(),
        freed_bytes = summary.freed_bytes,
        skipped_recent = summary.skipped_recent,
        "gc sweep complete"
    );
    Ok(summary)
}
