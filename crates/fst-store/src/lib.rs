//! Content-addressed storage for fst.
//!
//! Two object kinds live in a store, both keyed by the SHA-256 of their
//! bytes:
//!
//! - **blobs**: raw file contents
//! - **manifests**: canonical JSON encodings of [`fst_manifest::Manifest`]
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`InMemoryContentStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsContentStore`] -- one file per object under `{root}/{scope}/`
//!
//! # Design Rules
//!
//! 1. Objects are write-once. Writing an existing hash is a no-op.
//! 2. Every write recomputes the hash; a mismatch is rejected, never stored.
//! 3. Deletion exists only for rollback and garbage collection.
//! 4. A reader never observes a partially written object.

pub mod error;
pub mod fs;
pub mod gc;
pub mod integrity;
pub mod memory;
pub mod traits;

pub use error::{ObjectKind, StoreError, StoreResult};
pub use fs::FsContentStore;
pub use gc::{garbage_collect, live_set, GcOptions, GcSummary, LiveSet, ReferenceSource};
pub use integrity::validate_manifest_integrity;
pub use memory::InMemoryContentStore;
pub use traits::{ContentStore, ExistsResult, ObjectInfo, DEFAULT_EXISTS_BATCH_LIMIT};
