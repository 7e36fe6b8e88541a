use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use fst_dag::{resolve_merge_base, walk_chain, NewSnapshot, SnapshotSource, SnapshotStore};
use fst_manifest::{DriftReport, Manifest};
use fst_merge::ActionOrigin;
use fst_refs::{CasOutcome, Workspace, WorkspaceStore};
use fst_store::ContentStore;
use fst_sync::{Decisions, SyncError, SyncPreview};
use fst_types::ContentHash;

use crate::cli::*;
use crate::project::Project;
use crate::restore::{self, RestoreReport};
use crate::scan::{self, ScannedFile};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let dir = cli.dir;
    match cli.command {
        Command::Init(args) => cmd_init(&dir, args, &format).await,
        Command::Workspace(args) => cmd_workspace(&Project::open(&dir).await?, args, &format).await,
        Command::Snapshot(args) => cmd_snapshot(&Project::open(&dir).await?, args, &format).await,
        Command::Checkout(args) => cmd_checkout(&mut Project::open(&dir).await?, args, &format).await,
        Command::Log(args) => cmd_log(&Project::open(&dir).await?, args, &format).await,
        Command::Drift(args) => cmd_drift(&Project::open(&dir).await?, args, &format).await,
        Command::MergeBase(args) => cmd_merge_base(&Project::open(&dir).await?, args, &format).await,
        Command::Sync(args) => cmd_sync(&Project::open(&dir).await?, args, &format).await,
        Command::Undo(args) => cmd_undo(&Project::open(&dir).await?, args, &format).await,
        Command::Gc(args) => cmd_gc(&Project::open(&dir).await?, args, &format).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the operator hint for a sync failure, then hand the error back.
fn with_hint(err: SyncError) -> anyhow::Error {
    if let Some(hint) = err.user_hint() {
        eprintln!("{} {}", "hint:".yellow().bold(), hint);
    }
    for problem in err.rollback_errors() {
        eprintln!("{} {}", "rollback:".red(), problem);
    }
    err.into()
}

fn short(hash: Option<String>) -> String {
    hash.unwrap_or_else(|| "(none)".into())
}

// ---------------------------------------------------------------------------
// init / workspace
// ---------------------------------------------------------------------------

async fn cmd_init(dir: &Path, args: InitArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let name = match args.name {
        Some(name) => name,
        None => std::fs::canonicalize(dir)?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".into()),
    };
    let project = Project::init(dir, &name).await?;
    if let OutputFormat::Json = format {
        return print_json(&project.info);
    }
    println!("{} Initialized fst project {} in {}", "✓".green().bold(), name.bold(), dir.display());
    println!("  Project: {}", project.info.id.to_string().cyan());
    println!("  Workspace: {}", "main".yellow());
    Ok(())
}

async fn cmd_workspace(project: &Project, args: WorkspaceArgs, format: &OutputFormat) -> anyhow::Result<()> {
    match args.action {
        WorkspaceAction::Create { name } => {
            let ws = Workspace::new(project.info.id, name);
            project.workspaces.create_workspace(&ws).await?;
            report_workspace(project, &ws, "Created", format).await
        }
        WorkspaceAction::Fork { name, from } => {
            let source = project.workspace(&from).await?;
            let ws = Workspace::forked_from(&source, name);
            project.workspaces.create_workspace(&ws).await?;
            report_workspace(project, &ws, "Forked", format).await
        }
        WorkspaceAction::List => {
            let all = project.workspaces.list_workspaces(&project.info.id).await?;
            if let OutputFormat::Json = format {
                return print_json(&all);
            }
            for ws in &all {
                let marker = if project.checkout == ws.id { "*" } else { " " };
                println!(
                    "{} {:<20} {}  v{}",
                    marker.green().bold(),
                    ws.name.yellow(),
                    short(ws.head_snapshot_id.map(|h| h.short_hex())).dimmed(),
                    ws.version
                );
            }
            Ok(())
        }
        WorkspaceAction::Show { name } => {
            let ws = project.workspace(&name).await?;
            report_workspace(project, &ws, "Workspace", format).await
        }
    }
}

async fn report_workspace(
    project: &Project,
    ws: &Workspace,
    verb: &str,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        return print_json(ws);
    }
    println!("{} {}", verb.green().bold(), ws.name.yellow().bold());
    println!("  Id: {}", ws.id.to_string().cyan());
    println!("  Head: {}", short(ws.head_snapshot_id.map(|h| h.to_hex())));
    println!("  Version: {}", ws.version);
    if let Some(fork) = &ws.fork {
        let from = project
            .workspaces
            .get_workspace(&fork.source_workspace_id)
            .await?
            .map(|w| w.name)
            .unwrap_or_else(|| fork.source_workspace_id.short_id());
        println!("  Forked from: {} at {}", from.yellow(), fork.snapshot_id.short_hex());
    }
    for (source, record) in &ws.merge_history {
        let name = project
            .workspaces
            .get_workspace(source)
            .await?
            .map(|w| w.name)
            .unwrap_or_else(|| source.short_id());
        println!(
            "  Last merged from {}: {} ({})",
            name.yellow(),
            record.last_merged_snapshot.short_hex(),
            record.merged_at.to_rfc3339()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// snapshot / log / drift / merge-base
// ---------------------------------------------------------------------------

async fn scan_project(project: &Project) -> anyhow::Result<Vec<ScannedFile>> {
    scan::scan_blocking(&project.root).await
}

/// Upload every scanned blob the store lacks, one `exists` batch at a time.
async fn upload_missing(project: &Project, files: &[ScannedFile]) -> anyhow::Result<usize> {
    let by_hash: BTreeMap<ContentHash, &ScannedFile> =
        files.iter().map(|f| (f.entry.hash, f)).collect();
    let hashes: Vec<ContentHash> = by_hash.keys().copied().collect();

    let mut uploaded = 0;
    for chunk in hashes.chunks(project.content.exists_batch_limit().max(1)) {
        let answer = project.content.exists(chunk).await?;
        for hash in answer.missing {
            let Some(file) = by_hash.get(&hash) else { continue };
            let bytes = tokio::fs::read(&file.absolute).await?;
            project
                .content
                .put_blob(&hash, &bytes)
                .await
                .with_context(|| format!("{} changed while snapshotting", file.entry.path))?;
            uploaded += 1;
        }
    }
    Ok(uploaded)
}

#[derive(Serialize)]
struct SnapshotReport {
    workspace: String,
    snapshot_id: Option<String>,
    manifest_hash: String,
    files: usize,
    blobs_uploaded: usize,
    unchanged: bool,
}

async fn cmd_snapshot(project: &Project, args: SnapshotArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ws = project.checked_out().await?;
    let files = scan_project(project).await?;
    let blobs_uploaded = upload_missing(project, &files).await?;

    let manifest = Manifest::from_entries(files.iter().map(|f| f.entry.clone()))?;
    let (manifest_hash, _) = project.content.write_manifest(&manifest).await?;

    let unchanged = match ws.head_snapshot_id {
        Some(head) => project.snapshots.load_snapshot(&head).await?.manifest_hash == manifest_hash,
        None => false,
    };
    let mut report = SnapshotReport {
        workspace: ws.name.clone(),
        snapshot_id: None,
        manifest_hash: manifest_hash.to_hex(),
        files: manifest.len(),
        blobs_uploaded,
        unchanged,
    };

    if !unchanged {
        let mut new = NewSnapshot::new(project.info.id, ws.id, manifest_hash, SnapshotSource::Local)
            .parents(ws.head_snapshot_id)
            .author(Project::author());
        if let Some(message) = args.message {
            new = new.summary(message);
        }
        let snapshot_id = project.snapshots.write_snapshot(&new.build()).await?;
        match project
            .workspaces
            .compare_and_swap_head(&ws.id, ws.version, snapshot_id)
            .await?
        {
            CasOutcome::Updated { .. } => {}
            CasOutcome::VersionMismatch { .. } => {
                bail!("workspace `{}` moved while snapshotting; try again", ws.name)
            }
        }
        info!(workspace = %ws.name, snapshot = %snapshot_id.short_hex(), files = manifest.len(), "recorded snapshot");
        report.snapshot_id = Some(snapshot_id.to_hex());
    }

    if let OutputFormat::Json = format {
        return print_json(&report);
    }
    match &report.snapshot_id {
        None => println!("No changes in {} since its head.", ws.name.yellow()),
        Some(id) => {
            println!("{} Snapshot {} on {}", "✓".green().bold(), id[..12].yellow(), ws.name.yellow());
            println!("  Files: {}  Uploaded: {}", report.files, report.blobs_uploaded);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckoutReport {
    workspace: String,
    head: Option<String>,
    #[serde(flatten)]
    restored: RestoreReport,
}

async fn cmd_checkout(project: &mut Project, args: CheckoutArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let current = project.checked_out().await?;
    let target = project.workspace(&args.workspace).await?;
    let from = restore::ensure_clean(project, &current).await?;
    let restored = if target.id == current.id {
        RestoreReport::default()
    } else {
        let to = project.head_manifest(&target).await?;
        let restored = restore::materialize(project, &from, &to).await?;
        project.set_checkout(target.id).await?;
        info!(from = %current.name, to = %target.name, "checked out workspace");
        restored
    };

    let report = CheckoutReport {
        workspace: target.name.clone(),
        head: target.head_snapshot_id.map(|h| h.to_hex()),
        restored,
    };
    if let OutputFormat::Json = format {
        return print_json(&report);
    }
    if target.id == current.id {
        println!("Already on {}.", target.name.yellow());
        return Ok(());
    }
    println!(
        "{} Checked out {} at {}",
        "✓".green().bold(),
        target.name.yellow(),
        short(target.head_snapshot_id.map(|h| h.short_hex()))
    );
    print_restored(&report.restored);
    Ok(())
}

fn print_restored(report: &RestoreReport) {
    if !report.is_empty() {
        println!(
            "  Directory: {} written, {} removed",
            report.written.len(),
            report.removed.len()
        );
    }
}

async fn cmd_log(project: &Project, args: LogArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ws = project.workspace_or_checkout(args.workspace.as_deref()).await?;
    let Some(head) = ws.head_snapshot_id else {
        println!("Workspace {} has no snapshots.", ws.name.yellow());
        return Ok(());
    };
    let chain = walk_chain(&*project.snapshots, &head, args.limit).await?;
    if let OutputFormat::Json = format {
        return print_json(&chain);
    }
    for meta in &chain {
        let summary = meta.summary.as_deref().unwrap_or("");
        if args.oneline {
            println!("{} {:<8} {}", meta.id.short_hex().yellow(), meta.source, summary);
        } else {
            let merge = if meta.is_merge() { " (merge)".cyan().to_string() } else { String::new() };
            println!("{}{}", meta.id.to_hex().yellow().bold(), merge);
            println!("  Source: {}  Author: {}", meta.source, meta.author);
            println!("  Date: {}", meta.created_at.to_rfc3339());
            if !summary.is_empty() {
                println!("  {summary}");
            }
            println!();
        }
    }
    Ok(())
}

fn print_drift(report: &DriftReport) {
    if !report.has_drift() {
        println!("{} No drift.", "✓".green());
        return;
    }
    for path in &report.added {
        println!("  {} {}", "added:   ".green(), path);
    }
    for path in &report.modified {
        println!("  {} {}", "modified:".yellow(), path);
    }
    for path in &report.deleted {
        println!("  {} {}", "deleted: ".red(), path);
    }
    println!("{} changes, {} bytes", report.total_changes(), report.bytes_changed);
}

async fn cmd_drift(project: &Project, args: DriftArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ws = project.workspace_or_checkout(args.workspace.as_deref()).await?;
    let report = match args.against {
        Some(other) => {
            let source = project.workspace(&other).await?;
            let coordinator = project.coordinator().await?;
            coordinator.status(&ws.id, Some(&source.id)).await.map_err(with_hint)?.drift
        }
        None => {
            let head = project.head_manifest(&ws).await?;
            let current = scan::directory_manifest(&project.root).await?;
            DriftReport::between(&head, &current)
        }
    };
    if let OutputFormat::Json = format {
        return print_json(&report);
    }
    print_drift(&report);
    Ok(())
}

async fn cmd_merge_base(project: &Project, args: MergeBaseArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let target = project.workspace(&args.target).await?;
    let source = match args.source {
        Some(name) => project.workspace(&name).await?,
        None => {
            let main = project
                .info
                .main_workspace_id
                .context("project has no main workspace")?;
            project.workspaces.require_workspace(&main).await?
        }
    };
    let base = resolve_merge_base(&*project.snapshots, &target, &source).await?;
    if let OutputFormat::Json = format {
        return print_json(&base);
    }
    println!(
        "{} ({})",
        short(base.snapshot_id.map(|id| id.to_hex())).yellow(),
        base.source
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// sync / undo / gc
// ---------------------------------------------------------------------------

fn print_preview(preview: &SyncPreview) {
    println!("Preview {}", preview.id.yellow().bold());
    println!(
        "  Merge base: {} ({})",
        short(preview.merge_base_id().map(|id| id.short_hex())),
        preview.merge_base.source
    );
    println!("  Expires: {}", preview.expires_at.to_rfc3339());
    if preview.is_noop() {
        println!("{} Already in sync.", "✓".green());
    }
    for action in &preview.auto_actions {
        let tag = match action.origin {
            ActionOrigin::Source => "apply".green(),
            ActionOrigin::LineMerge => "merge".cyan(),
            ActionOrigin::Reconciler => "reconcile".blue(),
        };
        println!("  {:<10} {}  {}", tag, action.path, action.description.dimmed());
    }
    for decision in &preview.decisions_needed {
        println!("  {:<10} {}  {}", "conflict".red().bold(), decision.path, decision.reason.dimmed());
        for option in &decision.options {
            println!("             --choose {}={}  {}", decision.path, option.id, option.label.dimmed());
        }
    }
    for error in &preview.file_errors {
        println!("  {:<10} {}  {}", "error".red(), error.path, error.message);
    }
    for path in &preview.source_deletions_kept {
        println!("  {:<10} {}  deleted in source, kept here", "kept".yellow(), path);
    }
    println!(
        "  {} in sync, {} local-only",
        preview.in_sync_count, preview.excluded_count
    );
}

async fn cmd_sync(project: &Project, args: SyncArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let coordinator = project.coordinator().await?;
    match args.action {
        SyncAction::Prepare { workspace, from } => {
            let target = project.workspace_or_checkout(workspace.as_deref()).await?;
            let source = match from {
                Some(name) => Some(project.workspace(&name).await?.id),
                None => None,
            };
            let preview = coordinator
                .prepare(&target.id, source.as_ref())
                .await
                .map_err(with_hint)?;
            if let OutputFormat::Json = format {
                return print_json(&preview);
            }
            print_preview(&preview);
            Ok(())
        }
        SyncAction::Execute { preview, choices } => {
            let decisions: Decisions = choices.into_iter().collect();
            let target = coordinator.preview(&preview).await.map_err(with_hint)?.workspace_id;
            let before = if target == project.checkout {
                Some(restore::ensure_clean(project, &project.checked_out().await?).await?)
            } else {
                None
            };
            let outcome = coordinator
                .execute(&preview, &decisions)
                .await
                .map_err(with_hint)?;
            let restored = match before {
                Some(from) => {
                    let to = project.content.load_manifest(&outcome.manifest_hash).await?;
                    Some(restore::materialize(project, &from, &to).await?)
                }
                None => None,
            };
            if let OutputFormat::Json = format {
                return print_json(&Restored { outcome: &outcome, restored });
            }
            println!(
                "{} Synced: head {} (version {})",
                "✓".green().bold(),
                outcome.snapshot_id.short_hex().yellow(),
                outcome.version
            );
            println!(
                "  Files changed: {}  Blobs written: {}",
                outcome.files_changed, outcome.blobs_written
            );
            if let Some(restored) = &restored {
                print_restored(restored);
            }
            if let Some(pre) = outcome.pre_sync_snapshot_id {
                println!("  Undo with: fst undo {}", pre.short_hex());
            }
            Ok(())
        }
    }
}

/// A head-moving outcome plus what it did to the directory, if anything.
#[derive(Serialize)]
struct Restored<'a, T: Serialize> {
    #[serde(flatten)]
    outcome: &'a T,
    restored: Option<RestoreReport>,
}

async fn cmd_undo(project: &Project, args: UndoArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ws = project.workspace_or_checkout(args.workspace.as_deref()).await?;
    let target = project.resolve_snapshot(&args.snapshot).await?;
    let before = if ws.id == project.checkout {
        Some(restore::ensure_clean(project, &ws).await?)
    } else {
        None
    };
    let outcome = project
        .coordinator()
        .await?
        .undo(&ws.id, &target)
        .await
        .map_err(with_hint)?;
    let restored = match before {
        Some(from) => {
            let meta = project.snapshots.load_snapshot(&outcome.head).await?;
            let to = project.content.load_manifest(&meta.manifest_hash).await?;
            Some(restore::materialize(project, &from, &to).await?)
        }
        None => None,
    };
    if let OutputFormat::Json = format {
        return print_json(&Restored { outcome: &outcome, restored });
    }
    println!(
        "{} {} now at {} (version {})",
        "✓".green().bold(),
        ws.name.yellow(),
        outcome.head.short_hex(),
        outcome.version
    );
    if let Some(restored) = &restored {
        print_restored(restored);
    }
    Ok(())
}

async fn cmd_gc(project: &Project, args: GcArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let summary = project
        .coordinator()
        .await?
        .collect_garbage(args.dry_run)
        .await
        .map_err(with_hint)?;
    if let OutputFormat::Json = format {
        return print_json(&serde_json::json!({
            "dry_run": args.dry_run,
            "scanned": summary.scanned,
            "orphaned": summary.orphaned,
            "orphaned_blobs": summary.orphaned_hashes.iter().map(|h| h.to_hex()).collect::<Vec<_>>(),
            "orphaned_manifests": summary.orphaned_manifests.iter().map(|h| h.to_hex()).collect::<Vec<_>>(),
            "freed_bytes": summary.freed_bytes,
            "skipped_recent": summary.skipped_recent,
        }));
    }
    let verb = if args.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{} {} {} objects ({} bytes); {} scanned, {} too recent",
        "✓".green(),
        verb,
        summary.orphaned,
        summary.freed_bytes,
        summary.scanned,
        summary.skipped_recent
    );
    Ok(())
}
