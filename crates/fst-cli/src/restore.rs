//! Writing a workspace head back into the project directory.
//!
//! The directory holds exactly one workspace (see [`Project::checkout`]).
//! Whenever that workspace's head moves without a scan (sync, undo,
//! checkout), the directory is rewritten from the old head's manifest to
//! the new one so the next `fst snapshot` starts from what the head says.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{debug, info};

use fst_manifest::{diff, DriftReport, FileMode, Manifest};
use fst_refs::Workspace;
use fst_store::ContentStore;

use crate::project::Project;
use crate::scan;

/// Paths rewritten in the directory.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub written: Vec<String>,
    pub removed: Vec<String>,
}

impl RestoreReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

/// Head manifest of `ws`, after checking the directory matches it exactly.
///
/// Restoring over unsnapshotted edits would lose them, so any drift is an
/// error that asks for a snapshot first.
pub async fn ensure_clean(project: &Project, ws: &Workspace) -> anyhow::Result<Manifest> {
    let head = project.head_manifest(ws).await?;
    let on_disk = scan::directory_manifest(&project.root).await?;
    let drift = DriftReport::between(&head, &on_disk);
    if drift.has_drift() {
        bail!(
            "the directory has {} unsnapshotted change(s) to `{}`; run `fst snapshot` first",
            drift.total_changes(),
            ws.name
        );
    }
    Ok(head)
}

/// Rewrite the directory from `from` to `to`.
///
/// Removals run first so a path can turn from a file into a directory (or
/// back) in one pass.
pub async fn materialize(
    project: &Project,
    from: &Manifest,
    to: &Manifest,
) -> anyhow::Result<RestoreReport> {
    let changes = diff(from, to);
    let mut report = RestoreReport::default();

    for path in &changes.only_in_a {
        let target = project.root.join(path);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {path}")),
        }
        prune_empty_dirs(&project.root, &target).await;
        debug!(path, "removed");
        report.removed.push(path.clone());
    }

    for path in changes.only_in_b.iter().chain(&changes.different_in_both) {
        let Some(entry) = to.get(path) else { continue };
        let bytes = project
            .content
            .get_blob(&entry.hash)
            .await
            .with_context(|| format!("loading {path}"))?;
        write_file(project.root.join(path), bytes, entry.mode)
            .await
            .with_context(|| format!("writing {path}"))?;
        debug!(path, size = entry.size, "written");
        report.written.push(path.clone());
    }

    report.written.sort();
    info!(
        written = report.written.len(),
        removed = report.removed.len(),
        "restored directory"
    );
    Ok(report)
}

/// Remove now-empty directories between `file` and `root`.
async fn prune_empty_dirs(root: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(d) = dir {
        if d == root || tokio::fs::remove_dir(d).await.is_err() {
            break;
        }
        dir = d.parent();
    }
}

async fn write_file(dest: PathBuf, bytes: Vec<u8>, mode: FileMode) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        set_mode(tmp.as_file(), mode)?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .context("restore write panicked")??;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: FileMode) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode.bits()))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: FileMode) -> std::io::Result<()> {
    Ok(())
}
