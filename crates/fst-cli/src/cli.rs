use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fst", about = "fst: workspace snapshots and three-way sync", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Project directory (the one holding `.fst/`)
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub dir: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a project with a main workspace
    Init(InitArgs),
    /// Create, fork, and inspect workspaces
    Workspace(WorkspaceArgs),
    /// Record the project directory as a new snapshot of the checked-out workspace
    Snapshot(SnapshotArgs),
    /// Switch the project directory to another workspace's head
    Checkout(CheckoutArgs),
    /// Show a workspace's snapshot history
    Log(LogArgs),
    /// Show how the project directory differs from a workspace head
    Drift(DriftArgs),
    /// Show the merge base between two workspaces
    MergeBase(MergeBaseArgs),
    /// Prepare or execute a sync between workspaces
    Sync(SyncArgs),
    /// Point a workspace head back at an earlier snapshot
    Undo(UndoArgs),
    /// Remove objects no snapshot references
    Gc(GcArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Project name (defaults to the directory name)
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct WorkspaceArgs {
    #[command(subcommand)]
    pub action: WorkspaceAction,
}

#[derive(Subcommand)]
pub enum WorkspaceAction {
    /// Create an empty workspace
    Create { name: String },
    /// Fork a workspace at its current head
    Fork {
        name: String,
        #[arg(long, default_value = "main")]
        from: String,
    },
    /// List workspaces
    List,
    /// Show one workspace
    Show { name: String },
}

#[derive(Args)]
pub struct SnapshotArgs {
    #[arg(short, long)]
    pub message: Option<String>,
}

#[derive(Args)]
pub struct CheckoutArgs {
    pub workspace: String,
}

#[derive(Args)]
pub struct LogArgs {
    /// Defaults to the checked-out workspace
    #[arg(short, long)]
    pub workspace: Option<String>,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct DriftArgs {
    /// Defaults to the checked-out workspace
    #[arg(short, long)]
    pub workspace: Option<String>,
    /// Compare against another workspace's head instead of the directory
    #[arg(long)]
    pub against: Option<String>,
}

#[derive(Args)]
pub struct MergeBaseArgs {
    pub target: String,
    /// Defaults to the project's main workspace
    pub source: Option<String>,
}

#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub action: SyncAction,
}

#[derive(Subcommand)]
pub enum SyncAction {
    /// Plan a sync and print the preview
    Prepare {
        /// Target workspace (defaults to the checked-out one)
        #[arg(short, long)]
        workspace: Option<String>,
        /// Source workspace (defaults to main)
        #[arg(long)]
        from: Option<String>,
    },
    /// Apply a prepared sync; the directory follows when its workspace is the target
    Execute {
        preview: String,
        /// `path=option` for each conflicting path
        #[arg(long = "choose", value_parser = parse_choice)]
        choices: Vec<(String, String)>,
    },
}

#[derive(Args)]
pub struct UndoArgs {
    /// Snapshot id or unique prefix
    pub snapshot: String,
    /// Defaults to the checked-out workspace
    #[arg(short, long)]
    pub workspace: Option<String>,
}

#[derive(Args)]
pub struct GcArgs {
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_choice(s: &str) -> Result<(String, String), String> {
    match s.rsplit_once('=') {
        Some((path, option)) if !path.is_empty() && !option.is_empty() => {
            Ok((path.to_string(), option.to_string()))
        }
        _ => Err(format!("expected PATH=OPTION, got `{s}`")),
    }
}
