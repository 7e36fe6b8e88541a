//! Content-derived snapshot identifiers.
//!
//! The id is SHA-256 over a line-oriented encoding:
//!
//! ```text
//! snapshot\0manifest_hash <hex>\n
//! parent <id>\n          (one per parent, sorted)
//! author <author>\n
//! created_at <rfc3339>\n
//! ```
//!
//! Parent order does not affect the id; every other field does.

use sha2::{Digest, Sha256};

use fst_types::{ContentHash, SnapshotId, Timestamp};

/// The fields a snapshot id commits to.
#[derive(Clone, Debug)]
pub struct SnapshotIdentity<'a> {
    pub manifest_hash: &'a ContentHash,
    pub parents: &'a [SnapshotId],
    pub author: &'a str,
    pub created_at: &'a Timestamp,
}

/// Derive the snapshot id for the given identity fields.
pub fn compute_snapshot_id(identity: &SnapshotIdentity<'_>) -> SnapshotId {
    let mut parents: Vec<String> = identity.parents.iter().map(SnapshotId::to_hex).collect();
    parents.sort();
    parents.dedup();

    let mut hasher = Sha256::new();
    hasher.update(b"snapshot\0");
    hasher.update(format!("manifest_hash {}\n", identity.manifest_hash.to_hex()));
    for parent in &parents {
        hasher.update(format!("parent {parent}\n"));
    }
    hasher.update(format!("author {}\n", identity.author));
    hasher.update(format!("created_at {}\n", identity.created_at.to_rfc3339()));
    SnapshotId::from_bytes(hasher.finalize().into())
}

/// Returns `true` if `id` matches the identity fields it claims.
pub fn verify_snapshot_id(id: &SnapshotId, identity: &SnapshotIdentity<'_>) -> bool {
    compute_snapshot_id(identity) == *id
}
