//! Foundation types for fst.
//!
//! Every other fst crate depends on `fst-types`. The types here are plain
//! values: they carry no storage handles and perform no I/O.
//!
//! # Key Types
//!
//! - [`ContentHash`]: SHA-256 digest identifying a blob or manifest
//! - [`SnapshotId`]: content-derived identifier of a snapshot record
//! - [`WorkspaceId`] / [`ProjectId`]: UUID v7 identifiers
//! - [`Timestamp`]: millisecond-precision UTC instant with a stable RFC 3339 form

pub mod digest;
pub mod error;
pub mod ids;
pub mod time;

pub use digest::{ContentHash, SnapshotId};
pub use error::TypeError;
pub use ids::{ProjectId, WorkspaceId};
pub use time::Timestamp;
