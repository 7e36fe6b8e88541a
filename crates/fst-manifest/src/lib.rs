//! Manifest model for fst.
//!
//! A [`Manifest`] is the flat, path-sorted list of files that makes up one
//! snapshot of a workspace. Each [`FileEntry`] names a blob by its SHA-256.
//! Manifests are themselves content-addressed: [`Manifest::hash`] is the
//! SHA-256 of the canonical JSON encoding, which depends only on the logical
//! file set.
//!
//! # Design Rules
//!
//! 1. One entry per path; entries are always sorted by path.
//! 2. The canonical encoding is compact JSON with fixed field order.
//! 3. Manifests are values: building a new one never mutates an old one.

pub mod diff;
pub mod error;
pub mod manifest;

pub use diff::{diff, DriftReport, ManifestDiff};
pub use error::{ManifestError, ManifestResult};
pub use manifest::{FileEntry, FileMode, Manifest, ManifestBuilder, MANIFEST_VERSION};
