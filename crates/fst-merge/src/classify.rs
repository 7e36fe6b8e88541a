//! Three-way path classification.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use fst_manifest::{FileEntry, Manifest};

/// What a merge does with one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Take the source's version.
    Apply,
    /// Both sides changed the path incompatibly.
    Conflict,
    /// Nothing to pull; the current version stays.
    InSync,
    /// The source never had the path; it plays no part in this merge.
    Excluded,
}

/// Finer-grained reason behind a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    /// Present in source only; added there.
    AddedInSource,
    /// Source changed it, current did not.
    ChangedInSource,
    /// Current deleted it, source modified it.
    DeletedInCurrent,
    /// Current deleted it, source left it alone.
    DeletionStands,
    /// Source deleted it, current still has it; the local copy is kept.
    DeletedInSource,
    /// Deleted on both sides.
    DeletedInBoth,
    /// Current and source agree.
    Identical,
    /// Current changed it, source did not.
    ChangedInCurrent,
    /// Both sides changed it differently.
    ChangedInBoth,
    /// Both sides added different versions of a path the base lacks.
    AddedInBoth,
    /// Only the current side has ever had it.
    NotInSource,
}

impl Reason {
    pub fn classification(self) -> Classification {
        match self {
            Reason::AddedInSource | Reason::ChangedInSource => Classification::Apply,
            Reason::DeletedInCurrent | Reason::ChangedInBoth | Reason::AddedInBoth => {
                Classification::Conflict
            }
            Reason::DeletionStands
            | Reason::DeletedInSource
            | Reason::DeletedInBoth
            | Reason::Identical
            | Reason::ChangedInCurrent => Classification::InSync,
            Reason::NotInSource => Classification::Excluded,
        }
    }
}

fn same(a: &FileEntry, b: &FileEntry) -> bool {
    a.hash == b.hash && a.mode == b.mode
}

/// Classify one path from its entries in the three manifests.
pub fn classify_entry(
    base: Option<&FileEntry>,
    current: Option<&FileEntry>,
    source: Option<&FileEntry>,
) -> Reason {
    match (base, current, source) {
        (None, _, None) => Reason::NotInSource,
        (Some(_), Some(_), None) => Reason::DeletedInSource,
        (Some(_), None, None) => Reason::DeletedInBoth,
        (None, None, Some(_)) => Reason::AddedInSource,
        (Some(b), None, Some(s)) => {
            if same(b, s) {
                Reason::DeletionStands
            } else {
                Reason::DeletedInCurrent
            }
        }
        (b, Some(c), Some(s)) => {
            if same(c, s) {
                return Reason::Identical;
            }
            match b {
                None => Reason::AddedInBoth,
                Some(b) if same(b, s) => Reason::ChangedInCurrent,
                Some(b) if same(b, c) => Reason::ChangedInSource,
                Some(_) => Reason::ChangedInBoth,
            }
        }
    }
}

/// Classify every path in the union of the three manifests.
pub fn classify(base: &Manifest, current: &Manifest, source: &Manifest) -> BTreeMap<String, Reason> {
    let paths: BTreeSet<&str> = base
        .iter()
        .chain(current.iter())
        .chain(source.iter())
        .map(|f| f.path.as_str())
        .collect();

    paths
        .into_iter()
        .map(|path| {
            let reason = classify_entry(base.get(path), current.get(path), source.get(path));
            (path.to_string(), reason)
        })
        .collect()
}
