//! Snapshot history for fst.
//!
//! Snapshots are immutable nodes addressed by a content-derived id; their
//! parent links form a DAG. This crate stores them, answers ancestry
//! queries, and resolves the merge base used by a three-way merge.
//!
//! # Invariants
//!
//! - The graph is append-only; records are never replaced.
//! - Every parent reference resolves to an existing snapshot.
//! - A snapshot's id always matches its fields; loads re-check this.

pub mod ancestry;
pub mod error;
pub mod fs;
pub mod memory;
pub mod merge_base;
pub mod snapshot;
pub mod traits;

pub use ancestry::{common_ancestor, is_ancestor, walk_chain};
pub use error::{DagError, DagResult};
pub use fs::FsSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use merge_base::{resolve_merge_base, MergeBase, MergeBaseSource};
pub use snapshot::{NewSnapshot, SnapshotMeta, SnapshotSource};
pub use traits::SnapshotStore;
