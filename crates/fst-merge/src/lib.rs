//! Merge engine for fst.
//!
//! Given three manifests (the merge base, the current workspace, and the
//! source being pulled in) the engine decides, path by path, what a sync
//! would do:
//!
//! 1. [`classify`] assigns every path one of apply, conflict, in-sync, or
//!    excluded.
//! 2. Conflicts on text files are first tried as a line-level merge
//!    ([`line_merge`]).
//! 3. What remains goes to a [`Reconciler`]; if it fails, times out, or
//!    answers nonsense, the engine offers a plain two-option decision.
//!
//! The result is a [`MergePlan`]. Nothing is written to the store here.

pub mod classify;
pub mod engine;
pub mod error;
pub mod line_merge;
pub mod plan;
pub mod reconciler;

pub use classify::{classify, classify_entry, Classification, Reason};
pub use engine::{fallback_decision, MergeEngine, MergeOptions};
pub use error::{MergeError, MergeResult};
pub use plan::{
    ActionOrigin, AutoAction, Decision, DecisionOption, FileError, MergePlan, Resolution,
};
pub use reconciler::{
    ManualReconciler, ReconcileError, ReconcileOption, ReconcileOutcome, ReconcileRequest,
    Reconciler, USE_CURRENT, USE_SOURCE,
};
