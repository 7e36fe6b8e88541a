//! Traversal queries over the snapshot DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use fst_types::{SnapshotId, Timestamp};

use crate::error::DagResult;
use crate::snapshot::SnapshotMeta;
use crate::traits::SnapshotStore;

/// Follow first parents from `head`, newest first, returning at most `limit`
/// snapshots (including `head`).
pub async fn walk_chain(
    store: &dyn SnapshotStore,
    head: &SnapshotId,
    limit: usize,
) -> DagResult<Vec<SnapshotMeta>> {
    let mut out = Vec::new();
    let mut next = Some(*head);
    while let Some(id) = next {
        if out.len() >= limit {
            break;
        }
        let meta = store.load_snapshot(&id).await?;
        next = meta.first_parent().copied();
        out.push(meta);
    }
    Ok(out)
}

/// `true` if `ancestor` is reachable from `start` through any parent edge.
/// A snapshot counts as its own ancestor.
pub async fn is_ancestor(
    store: &dyn SnapshotStore,
    ancestor: &SnapshotId,
    start: &SnapshotId,
) -> DagResult<bool> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*start]);
    while let Some(id) = queue.pop_front() {
        if id == *ancestor {
            return Ok(true);
        }
        if !seen.insert(id) {
            continue;
        }
        let meta = store.load_snapshot(&id).await?;
        queue.extend(meta.parent_snapshot_ids.iter().copied());
    }
    Ok(false)
}

/// Breadth-first distances from `head` to every ancestor (including itself).
async fn distances(
    store: &dyn SnapshotStore,
    head: &SnapshotId,
) -> DagResult<HashMap<SnapshotId, usize>> {
    let mut dist = HashMap::new();
    let mut queue = VecDeque::from([(*head, 0usize)]);
    while let Some((id, d)) = queue.pop_front() {
        if dist.contains_key(&id) {
            continue;
        }
        let meta = store.load_snapshot(&id).await?;
        dist.insert(id, d);
        for parent in &meta.parent_snapshot_ids {
            if !dist.contains_key(parent) {
                queue.push_back((*parent, d + 1));
            }
        }
    }
    Ok(dist)
}

/// The common ancestor of `a` and `b` closest to both heads.
///
/// Candidates are scored by the sum of their distances from the two heads;
/// the lowest score wins and ties go to the most recently created snapshot.
/// Returns `None` when the histories share no snapshot.
pub async fn common_ancestor(
    store: &dyn SnapshotStore,
    a: &SnapshotId,
    b: &SnapshotId,
) -> DagResult<Option<SnapshotId>> {
    let from_a = distances(store, a).await?;

    let mut best: Option<(usize, Timestamp, SnapshotId)> = None;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(*b, 0usize)]);

    while let Some((id, d)) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some((score, _, _)) = best {
            if d > score {
                break;
            }
        }
        let meta = store.load_snapshot(&id).await?;
        if let Some(da) = from_a.get(&id) {
            let score = d + da;
            let better = match &best {
                None => true,
                Some((s, t, _)) => score < *s || (score == *s && meta.created_at > *t),
            };
            if better {
                best = Some((score, meta.created_at, id));
            }
        }
        for parent in &meta.parent_snapshot_ids {
            if !seen.contains(parent) {
                queue.push_back((*parent, d + 1));
            }
        }
    }

    Ok(best.map(|(_, _, id)| id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySnapshotStore;
    use crate::snapshot::{NewSnapshot, SnapshotSource};
    use fst_types::{ContentHash, ProjectId, WorkspaceId};

    /// Builds small histories with distinct, increasing timestamps.
    struct Graph {
        store: InMemorySnapshotStore,
        clock: std::cell::Cell<i64>,
    }

    impl Graph {
        fn new() -> Self {
            Self {
                store: InMemorySnapshotStore::new(),
                clock: std::cell::Cell::new(0),
            }
        }

        async fn add(&self, parents: &[SnapshotId]) -> SnapshotId {
            let t = self.clock.get() + 1;
            self.clock.set(t);
            let meta = NewSnapshot::new(
                ProjectId::new(),
                WorkspaceId::new(),
                ContentHash::from_bytes([t as u8; 32]),
                SnapshotSource::Local,
            )
            .parents(parents.iter().copied())
            .created_at(Timestamp::from_millis(t))
            .build();
            self.store.write_snapshot(&meta).await.unwrap()
        }
    }

    #[tokio::test]
    async fn walk_chain_follows_first_parent() {
        let g = Graph::new();
        let a = g.add(&[]).await;
        let b = g.add(&[a]).await;
        let side = g.add(&[]).await;
        let c = g.add(&[b, side]).await;

        let chain: Vec<SnapshotId> = walk_chain(&g.store, &c, 10)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(chain, vec![c, b, a]);

        assert_eq!(walk_chain(&g.store, &c, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ancestry() {
        let g = Graph::new();
        let a = g.add(&[]).await;
        let b = g.add(&[a]).await;
        let other = g.add(&[]).await;
        assert!(is_ancestor(&g.store, &a, &b).await.unwrap());
        assert!(is_ancestor(&g.store, &b, &b).await.unwrap());
        assert!(!is_ancestor(&g.store, &b, &a).await.unwrap());
        assert!(!is_ancestor(&g.store, &other, &b).await.unwrap());
    }

    #[tokio::test]
    async fn common_ancestor_of_diverged_branches() {
        //   root - base - x1 - x2
        //             \
        //              y1
        let g = Graph::new();
        let root = g.add(&[]).await;
        let base = g.add(&[root]).await;
        let x1 = g.add(&[base]).await;
        let x2 = g.add(&[x1]).await;
        let y1 = g.add(&[base]).await;

        assert_eq!(common_ancestor(&g.store, &x2, &y1).await.unwrap(), Some(base));
        assert_eq!(common_ancestor(&g.store, &y1, &x2).await.unwrap(), Some(base));
    }

    #[tokio::test]
    async fn common_ancestor_after_previous_merge() {
        //   base - a1 ------ a2(merge of a1, b1) - a3
        //      \           /
        //       b1 ------ b2
        let g = Graph::new();
        let base = g.add(&[]).await;
        let a1 = g.add(&[base]).await;
        let b1 = g.add(&[base]).await;
        let a2 = g.add(&[a1, b1]).await;
        let a3 = g.add(&[a2]).await;
        let b2 = g.add(&[b1]).await;

        assert_eq!(common_ancestor(&g.store, &a3, &b2).await.unwrap(), Some(b1));
    }

    #[tokio::test]
    async fn ties_prefer_newest() {
        //   p (older) and q (newer) are both parents of m1 and m2.
        let g = Graph::new();
        let p = g.add(&[]).await;
        let q = g.add(&[]).await;
        let m1 = g.add(&[p, q]).await;
        let m2 = g.add(&[q, p]).await;
        assert_eq!(common_ancestor(&g.store, &m1, &m2).await.unwrap(), Some(q));
    }

    #[tokio::test]
    async fn unrelated_histories_have_no_common_ancestor() {
        let g = Graph::new();
        let a = g.add(&[]).await;
        let b = g.add(&[]).await;
        assert_eq!(common_ancestor(&g.store, &a, &b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn same_head_is_its_own_ancestor() {
        let g = Graph::new();
        let a = g.add(&[]).await;
        assert_eq!(common_ancestor(&g.store, &a, &a).await.unwrap(), Some(a));
    }
}
