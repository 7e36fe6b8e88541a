use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fst_crypto::ContentHasher;
use fst_types::ContentHash;

use crate::error::{ManifestError, ManifestResult};

/// Format version written into every manifest.
pub const MANIFEST_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// FileMode
// ---------------------------------------------------------------------------

/// Unix permission bits of a tracked file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Normal file (0o644).
    pub const REGULAR: Self = Self(0o644);
    /// Executable file (0o755).
    pub const EXECUTABLE: Self = Self(0o755);

    /// Keep only the permission bits of a raw `st_mode`.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0o7777)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Any execute bit set.
    pub fn is_executable(&self) -> bool {
        self.0 & 0o111 != 0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::REGULAR
    }
}

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FileEntry
// ---------------------------------------------------------------------------

/// A single file in a manifest.
///
/// Field order is part of the canonical encoding; do not reorder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Workspace-relative path with forward slashes.
    pub path: String,
    /// SHA-256 of the file's bytes.
    pub hash: ContentHash,
    /// Size of the file in bytes.
    pub size: u64,
    /// Permission bits.
    pub mode: FileMode,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, hash: ContentHash, size: u64, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            hash,
            size,
            mode,
        }
    }

    /// Entry for in-memory content, hashing it.
    pub fn for_content(path: impl Into<String>, content: &[u8], mode: FileMode) -> Self {
        Self::new(path, ContentHasher::hash(content), content.len() as u64, mode)
    }
}

fn validate_path(path: &str) -> ManifestResult<()> {
    let invalid = |reason: &str| ManifestError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if path.contains('\\') {
        return Err(invalid("backslash separator"));
    }
    if path.contains('\0') {
        return Err(invalid("NUL byte"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Serialized shape of a manifest, validated into [`Manifest`] on decode.
#[derive(Deserialize)]
struct RawManifest {
    version: String,
    files: Vec<FileEntry>,
}

/// A complete file-tree snapshot: path-sorted entries, one per path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawManifest")]
pub struct Manifest {
    version: String,
    files: Vec<FileEntry>,
}

impl TryFrom<RawManifest> for Manifest {
    type Error = ManifestError;

    fn try_from(raw: RawManifest) -> ManifestResult<Self> {
        if raw.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(raw.version));
        }
        Self::from_entries(raw.files)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifest {
    /// The manifest with no files (used as the base of a two-way merge).
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            files: Vec::new(),
        }
    }

    /// Build from entries in any order. Rejects duplicate and invalid paths.
    pub fn from_entries(entries: impl IntoIterator<Item = FileEntry>) -> ManifestResult<Self> {
        let mut builder = ManifestBuilder::new();
        for entry in entries {
            builder.insert(entry)?;
        }
        Ok(builder.build())
    }

    /// Build from a path-keyed map. Keys are trusted to equal `entry.path`.
    pub fn from_map(map: BTreeMap<String, FileEntry>) -> ManifestResult<Self> {
        for (path, entry) in &map {
            validate_path(path)?;
            if *path != entry.path {
                return Err(ManifestError::InvalidPath {
                    path: path.clone(),
                    reason: format!("map key does not match entry path {:?}", entry.path),
                });
            }
        }
        Ok(Self {
            version: MANIFEST_VERSION.to_string(),
            files: map.into_values().collect(),
        })
    }

    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::new()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Entries sorted by path.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter()
    }

    /// Look up an entry by path.
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Distinct blob hashes referenced by this manifest, sorted.
    pub fn blob_hashes(&self) -> Vec<ContentHash> {
        let mut hashes: Vec<ContentHash> = self.files.iter().map(|f| f.hash).collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    /// Copy the entries into a path-keyed map for copy-on-write editing.
    pub fn to_map(&self) -> BTreeMap<String, FileEntry> {
        self.files
            .iter()
            .map(|f| (f.path.clone(), f.clone()))
            .collect()
    }

    /// Canonical encoding: compact JSON, fixed field order, sorted entries.
    pub fn to_canonical_json(&self) -> ManifestResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ManifestError::Serialization(e.to_string()))
    }

    /// Decode and validate a manifest.
    pub fn from_json(data: &[u8]) -> ManifestResult<Self> {
        serde_json::from_slice(data).map_err(|e| ManifestError::Serialization(e.to_string()))
    }

    /// SHA-256 of the canonical encoding.
    pub fn hash(&self) -> ManifestResult<ContentHash> {
        Ok(ContentHasher::hash(&self.to_canonical_json()?))
    }
}

// ---------------------------------------------------------------------------
// ManifestBuilder
// ---------------------------------------------------------------------------

/// Accumulates entries in any order and produces a sorted [`Manifest`].
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    entries: BTreeMap<String, FileEntry>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; a second entry for the same path is an error.
    pub fn insert(&mut self, entry: FileEntry) -> ManifestResult<&mut Self> {
        validate_path(&entry.path)?;
        if self.entries.contains_key(&entry.path) {
            return Err(ManifestError::DuplicatePath(entry.path));
        }
        self.entries.insert(entry.path.clone(), entry);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Manifest {
        Manifest {
            version: MANIFEST_VERSION.to_string(),
            files: self.entries.into_values().collect(),
        }
    }
}
