//! Merge-base resolution between two workspaces.
//!
//! Workspace metadata is consulted before the graph: merge history and fork
//! points are cheap, exact, and survive histories that were imported without
//! shared snapshots. Graph search only runs when metadata has no answer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use fst_refs::Workspace;
use fst_types::{SnapshotId, Timestamp};

use crate::ancestry::common_ancestor;
use crate::error::{DagError, DagResult};
use crate::traits::SnapshotStore;

/// Which rule produced a merge base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBaseSource {
    /// The target previously merged from this source.
    MergeHistory,
    /// The target was forked from the source.
    TargetForkedFromSource,
    /// The source was forked from the target.
    SourceForkedFromTarget,
    /// Both were forked from the same third workspace.
    SiblingFork,
    /// Nearest common ancestor of the two heads in the snapshot graph.
    CommonAncestor,
    /// The target's own fork point.
    TargetForkPoint,
    /// Nothing shared; merge two-way against an empty base.
    None,
}

impl std::fmt::Display for MergeBaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MergeHistory => "merge history",
            Self::TargetForkedFromSource => "target forked from source",
            Self::SourceForkedFromTarget => "source forked from target",
            Self::SiblingFork => "sibling fork",
            Self::CommonAncestor => "common ancestor",
            Self::TargetForkPoint => "target fork point",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// A resolved merge base and the rule that found it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBase {
    pub snapshot_id: Option<SnapshotId>,
    pub source: MergeBaseSource,
}

impl MergeBase {
    fn found(snapshot_id: SnapshotId, source: MergeBaseSource) -> Self {
        Self {
            snapshot_id: Some(snapshot_id),
            source,
        }
    }

    fn none() -> Self {
        Self {
            snapshot_id: None,
            source: MergeBaseSource::None,
        }
    }
}

/// Pick the snapshot to diff both sides against when merging `source` into
/// `target`.
///
/// Resolution order:
/// 1. the last snapshot merged from `source` into `target`
/// 2. `target`'s fork point, if it was forked from `source`
/// 3. `source`'s fork point, if it was forked from `target`
/// 4. when both were forked from the same workspace, the older fork point
/// 5. the nearest common ancestor of the two heads
/// 6. `target`'s fork point, whatever it was forked from
///
/// Returns [`MergeBaseSource::None`] when every rule comes up empty.
pub async fn resolve_merge_base(
    snapshots: &dyn SnapshotStore,
    target: &Workspace,
    source: &Workspace,
) -> DagResult<MergeBase> {
    let base = resolve(snapshots, target, source).await?;
    debug!(
        target = %target.id.short_id(),
        source = %source.id.short_id(),
        base = ?base.snapshot_id.map(|id| id.short_hex()),
        rule = %base.source,
        "resolved merge base"
    );
    Ok(base)
}

async fn resolve(
    snapshots: &dyn SnapshotStore,
    target: &Workspace,
    source: &Workspace,
) -> DagResult<MergeBase> {
    if let Some(id) = target.last_merged_from(&source.id) {
        return Ok(MergeBase::found(id, MergeBaseSource::MergeHistory));
    }

    if let Some(fork) = &target.fork {
        if fork.source_workspace_id == source.id {
            return Ok(MergeBase::found(
                fork.snapshot_id,
                MergeBaseSource::TargetForkedFromSource,
            ));
        }
    }

    if let Some(fork) = &source.fork {
        if fork.source_workspace_id == target.id {
            return Ok(MergeBase::found(
                fork.snapshot_id,
                MergeBaseSource::SourceForkedFromTarget,
            ));
        }
    }

    if let (Some(tf), Some(sf)) = (&target.fork, &source.fork) {
        if tf.source_workspace_id == sf.source_workspace_id {
            let earlier = older_of(snapshots, tf.snapshot_id, sf.snapshot_id).await?;
            return Ok(MergeBase::found(earlier, MergeBaseSource::SiblingFork));
        }
    }

    if let (Some(th), Some(sh)) = (target.head_snapshot_id, source.head_snapshot_id) {
        if let Some(id) = common_ancestor(snapshots, &th, &sh).await? {
            return Ok(MergeBase::found(id, MergeBaseSource::CommonAncestor));
        }
    }

    if let Some(id) = target.fork_snapshot() {
        return Ok(MergeBase::found(id, MergeBaseSource::TargetForkPoint));
    }

    Ok(MergeBase::none())
}

async fn created_at(snapshots: &dyn SnapshotStore, id: &SnapshotId) -> DagResult<Option<Timestamp>> {
    match snapshots.load_snapshot(id).await {
        Ok(meta) => Ok(Some(meta.created_at)),
        Err(DagError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The snapshot created first. A snapshot that cannot be found loses.
async fn older_of(
    snapshots: &dyn SnapshotStore,
    a: SnapshotId,
    b: SnapshotId,
) -> DagResult<SnapshotId> {
    if a == b {
        return Ok(a);
    }
    let ta = created_at(snapshots, &a).await?;
    let tb = created_at(snapshots, &b).await?;
    Ok(match (ta, tb) {
        (Some(ta), Some(tb)) if tb < ta => b,
        (None, Some(_)) => b,
        _ => a,
    })
}
