//! The output of a merge: what to apply, what to ask, what went wrong.

use serde::{Deserialize, Serialize};

use fst_crypto::ContentHasher;
use fst_manifest::{FileEntry, FileMode};
use fst_types::ContentHash;

use crate::classify::Reason;

/// Final content of one path after a merge step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// A blob that is already stored.
    Existing {
        hash: ContentHash,
        size: u64,
        mode: FileMode,
    },
    /// New bytes that must be written before the manifest references them.
    Content { bytes: Vec<u8>, mode: FileMode },
    /// Remove the path.
    Delete,
}

impl Resolution {
    /// Reference an existing manifest entry's blob.
    pub fn from_entry(entry: &FileEntry) -> Self {
        Self::Existing {
            hash: entry.hash,
            size: entry.size,
            mode: entry.mode,
        }
    }

    /// Wrap produced bytes, collapsing to [`Resolution::Existing`] when they
    /// are exactly one of the known `entries`.
    pub fn from_bytes(bytes: Vec<u8>, mode: FileMode, known: &[Option<&FileEntry>]) -> Self {
        let hash = ContentHasher::hash(&bytes);
        for entry in known.iter().flatten() {
            if entry.hash == hash && entry.mode == mode {
                return Self::from_entry(entry);
            }
        }
        Self::Content { bytes, mode }
    }

    /// The manifest entry this resolution produces at `path`, if any.
    pub fn to_entry(&self, path: &str) -> Option<FileEntry> {
        match self {
            Self::Existing { hash, size, mode } => Some(FileEntry::new(path, *hash, *size, *mode)),
            Self::Content { bytes, mode } => Some(FileEntry::for_content(path, bytes, *mode)),
            Self::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Who produced an automatic action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOrigin {
    /// Plain copy of the source's version.
    Source,
    /// Non-overlapping line-level merge.
    LineMerge,
    /// The reconciler combined both versions.
    Reconciler,
}

/// A change the merge applies without asking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoAction {
    pub path: String,
    pub resolution: Resolution,
    pub origin: ActionOrigin,
    pub description: String,
}

/// One answer to a [`Decision`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    pub label: String,
    pub resolution: Resolution,
}

/// A conflict that needs a human choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub path: String,
    pub reason: String,
    pub options: Vec<DecisionOption>,
}

impl Decision {
    pub fn option(&self, id: &str) -> Option<&DecisionOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn option_ids(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.id.as_str())
    }
}

/// A non-fatal problem with one path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Everything a merge of source into current would do.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub auto_actions: Vec<AutoAction>,
    pub decisions_needed: Vec<Decision>,
    pub file_errors: Vec<FileError>,
    /// Paths that need no change, sorted.
    pub in_sync: Vec<String>,
    /// Paths only the current side has ever held.
    pub excluded_count: usize,
    /// Paths the source deleted that the current side keeps.
    pub source_deletions_kept: Vec<String>,
}

impl MergePlan {
    pub fn in_sync_count(&self) -> usize {
        self.in_sync.len()
    }

    /// `true` if executing the plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.auto_actions.is_empty() && self.decisions_needed.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.decisions_needed.is_empty()
    }

    pub fn decision(&self, path: &str) -> Option<&Decision> {
        self.decisions_needed.iter().find(|d| d.path == path)
    }

    pub(crate) fn push_in_sync(&mut self, path: &str, reason: Reason) {
        if reason == Reason::DeletedInSource {
            self.source_deletions_kept.push(path.to_string());
        }
        self.in_sync.push(path.to_string());
    }
}

/// Hash of bytes a [`Resolution::Content`] would write.
pub fn content_hash(resolution: &Resolution) -> Option<ContentHash> {
    match resolution {
        Resolution::Existing { hash, .. } => Some(*hash),
        Resolution::Content { bytes, .. } => Some(ContentHasher::hash(bytes)),
        Resolution::Delete => None,
    }
}
