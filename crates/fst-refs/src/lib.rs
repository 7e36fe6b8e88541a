//! Workspace records for fst.
//!
//! A workspace is an independent working copy of a project. Its record holds
//! the mutable state the rest of the engine reads and updates:
//!
//! - the **head**: the snapshot the workspace currently sits on
//! - the **version**: an optimistic-lock token bumped on every head update
//! - the **fork point**: where the workspace was forked from, if anywhere
//! - the **merge history**: per source workspace, the last snapshot merged in
//!
//! # Modules
//!
//! - [`error`]: Error types for workspace operations
//! - [`types`]: [`Workspace`], [`ForkPoint`], [`MergeRecord`], [`ProjectInfo`]
//! - [`traits`]: The [`WorkspaceStore`] trait, including compare-and-swap
//! - [`names`]: Workspace name validation
//! - [`memory`]: In-memory [`InMemoryWorkspaceStore`] for tests
//! - [`fs`]: JSON-file [`FsWorkspaceStore`]

pub mod error;
pub mod fs;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use fs::FsWorkspaceStore;
pub use memory::InMemoryWorkspaceStore;
pub use names::validate_workspace_name;
pub use traits::{CasOutcome, WorkspaceStore};
pub use types::{ForkPoint, MergeRecord, ProjectInfo, Workspace};
