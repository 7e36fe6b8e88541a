//! Pluggable conflict reconciliation.
//!
//! A [`Reconciler`] is asked to combine two conflicting versions of a file.
//! It may be slow or fail; the engine bounds it with a timeout and falls back
//! to a deterministic two-option decision whenever it errors, times out, or
//! returns something unusable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Option id for "take the source's version".
pub const USE_SOURCE: &str = "use_source";
/// Option id for "keep the current version".
pub const USE_CURRENT: &str = "use_current";

/// Input to a reconciliation.
#[derive(Clone, Copy, Debug)]
pub struct ReconcileRequest<'a> {
    pub path: &'a str,
    /// Content at the merge base, when both sides descend from one.
    pub base: Option<&'a [u8]>,
    pub current: &'a [u8],
    pub source: &'a [u8],
}

/// One candidate resolution offered by a reconciler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOption {
    pub id: String,
    pub label: String,
    pub content: Vec<u8>,
}

/// What a reconciler decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The versions could be combined automatically.
    Compatible { content: Vec<u8>, description: String },
    /// A human must choose between the offered options.
    Incompatible {
        reason: String,
        options: Vec<ReconcileOption>,
    },
}

/// Reconciler failure. Always recovered by the engine.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("reconciler unavailable: {0}")]
    Unavailable(String),
    #[error("reconciliation failed: {0}")]
    Failed(String),
}

/// Strategy for combining conflicting file versions.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError>;
}

/// Never combines anything: always offers the two versions as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualReconciler;

#[async_trait]
impl Reconciler for ManualReconciler {
    async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        Ok(ReconcileOutcome::Incompatible {
            reason: format!("{} was changed on both sides", request.path),
            options: vec![
                ReconcileOption {
                    id: USE_SOURCE.into(),
                    label: "Use source version".into(),
                    content: request.source.to_vec(),
                },
                ReconcileOption {
                    id: USE_CURRENT.into(),
                    label: "Keep current version".into(),
                    content: request.current.to_vec(),
                },
            ],
        })
    }
}

/// Check an `Incompatible` answer is usable: at least two options, each with
/// a distinct non-empty id.
pub fn options_are_well_formed(options: &[ReconcileOption]) -> bool {
    if options.len() < 2 {
        return false;
    }
    let mut ids: Vec<&str> = options.iter().map(|o| o.id.as_str()).collect();
    if ids.iter().any(|id| id.trim().is_empty()) {
        return false;
    }
    ids.sort_unstable();
    ids.windows(2).all(|w| w[0] != w[1])
}
