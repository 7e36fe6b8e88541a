//! Directory scanning into manifest entries.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ignore::WalkBuilder;

use fst_manifest::{FileEntry, FileMode, Manifest};

use crate::project::FST_DIR;

/// Per-directory ignore file, same syntax as `.gitignore`.
pub const IGNORE_FILE: &str = ".fstignore";

/// A file found by [`scan`], with the entry its current bytes produce.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub entry: FileEntry,
    pub absolute: PathBuf,
}

/// Walk `root`, honoring `.gitignore` and `.fstignore`, and hash every
/// regular file. Results are sorted by path.
pub fn scan(root: &Path) -> anyhow::Result<Vec<ScannedFile>> {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .parents(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE)
        .filter_entry(|e| e.file_name() != FST_DIR && e.file_name() != ".git")
        .build();

    let mut files = Vec::new();
    for dent in walker {
        let dent = dent.context("walking project directory")?;
        if !dent.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let absolute = dent.into_path();
        let relative = relative_path(root, &absolute)?;
        let content = std::fs::read(&absolute)
            .with_context(|| format!("reading {}", absolute.display()))?;
        let entry = FileEntry::for_content(relative, &content, file_mode(&absolute)?);
        files.push(ScannedFile { entry, absolute });
    }
    files.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));
    Ok(files)
}

/// [`scan`] on the blocking pool.
pub async fn scan_blocking(root: &Path) -> anyhow::Result<Vec<ScannedFile>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan(&root))
        .await
        .context("directory scan panicked")?
}

/// The manifest the directory under `root` would snapshot to.
pub async fn directory_manifest(root: &Path) -> anyhow::Result<Manifest> {
    let files = scan_blocking(root).await?;
    Ok(Manifest::from_entries(files.into_iter().map(|f| f.entry))?)
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> anyhow::Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(path: &Path) -> anyhow::Result<FileMode> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(if mode & 0o111 != 0 {
        FileMode::EXECUTABLE
    } else {
        FileMode::REGULAR
    })
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> anyhow::Result<FileMode> {
    Ok(FileMode::REGULAR)
}
