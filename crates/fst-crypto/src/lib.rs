//! Hashing primitives for fst.
//!
//! Blobs and manifests are addressed by the plain SHA-256 of their bytes, so
//! a hash can be checked by anyone holding the content. Snapshot ids are
//! derived from a fixed textual encoding of the snapshot's identity fields.
//!
//! All crypto operations wrap established libraries: no custom cryptography.

pub mod hasher;
pub mod snapshot_id;

pub use hasher::{ContentHasher, StreamingHasher};
pub use snapshot_id::{compute_snapshot_id, verify_snapshot_id, SnapshotIdentity};
