//! Sync coordinator for fst.
//!
//! Pulls one workspace's changes into another in three steps:
//!
//! 1. **prepare**: resolve the merge base, run the merge engine, and cache
//!    the result as a [`SyncPreview`] with a TTL
//! 2. **execute**: apply the preview plus the caller's [`Decisions`],
//!    writing blobs, a manifest, and a snapshot, then move the head with a
//!    compare-and-swap; any failure before that rolls back
//! 3. **undo**: point a head back at an earlier snapshot
//!
//! Collaborators are traits so that embedders can supply their own:
//! [`AccessGate`], [`EphemeralStore`], [`ActivitySink`], and the merge
//! engine's [`fst_merge::Reconciler`].

pub mod access;
pub mod activity;
pub mod config;
pub mod coordinator;
pub mod ephemeral;
pub mod error;
pub mod preview;
pub mod rollback;

pub use access::{AccessGate, Actor, AllowAll, Session};
pub use activity::{
    ActivityEvent, ActivityKind, ActivitySink, InMemoryActivityLog, JsonlActivityLog,
    TracingActivitySink,
};
pub use config::SyncConfig;
pub use coordinator::{Decisions, ExecuteOutcome, SyncCoordinator, SyncStatus, UndoOutcome};
pub use ephemeral::{EphemeralStore, FsEphemeralStore, InMemoryEphemeralStore};
pub use error::{SyncError, SyncResult};
pub use preview::{PreparedSync, SyncPreview, SyncState};
pub use rollback::RollbackContext;
