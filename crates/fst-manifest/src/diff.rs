use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// Path-level comparison of two manifests.
///
/// Every list is sorted by path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    /// Paths present only in `a`.
    pub only_in_a: Vec<String>,
    /// Paths present only in `b`.
    pub only_in_b: Vec<String>,
    /// Paths present in both with identical hash and mode.
    pub same_in_both: Vec<String>,
    /// Paths present in both whose hash or mode differ.
    pub different_in_both: Vec<String>,
}

impl ManifestDiff {
    /// `true` when the manifests describe the same tree.
    pub fn is_identical(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty() && self.different_in_both.is_empty()
    }
}

/// Compare two manifests with a single merge walk over their sorted entries.
pub fn diff(a: &Manifest, b: &Manifest) -> ManifestDiff {
    let mut out = ManifestDiff::default();
    let (fa, fb) = (a.files(), b.files());
    let (mut i, mut j) = (0, 0);

    while i < fa.len() || j < fb.len() {
        match (fa.get(i), fb.get(j)) {
            (Some(ea), Some(eb)) => match ea.path.cmp(&eb.path) {
                std::cmp::Ordering::Less => {
                    out.only_in_a.push(ea.path.clone());
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.only_in_b.push(eb.path.clone());
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    if ea.hash == eb.hash && ea.mode == eb.mode {
                        out.same_in_both.push(ea.path.clone());
                    } else {
                        out.different_in_both.push(ea.path.clone());
                    }
                    i += 1;
                    j += 1;
                }
            },
            (Some(ea), None) => {
                out.only_in_a.push(ea.path.clone());
                i += 1;
            }
            (None, Some(eb)) => {
                out.only_in_b.push(eb.path.clone());
                j += 1;
            }
            (None, None) => break,
        }
    }

    out
}

/// How far a workspace has moved from a reference manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Bytes in added files plus the new size of modified files.
    pub bytes_changed: u64,
}

impl DriftReport {
    /// Drift of `current` relative to `base`.
    pub fn between(base: &Manifest, current: &Manifest) -> Self {
        let d = diff(base, current);
        let size_in_current = |path: &String| current.get(path).map(|f| f.size).unwrap_or(0);
        let bytes_changed = d
            .only_in_b
            .iter()
            .chain(d.different_in_both.iter())
            .map(size_in_current)
            .sum();

        Self {
            added: d.only_in_b,
            modified: d.different_in_both,
            deleted: d.only_in_a,
            bytes_changed,
        }
    }

    pub fn has_drift(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}
