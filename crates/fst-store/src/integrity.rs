use fst_manifest::Manifest;

use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// Check that every blob a manifest lists is present in the store.
///
/// Queries are chunked to the store's `exists` batch limit. Fails with
/// [`StoreError::ManifestInvalid`] naming every missing blob.
pub async fn validate_manifest_integrity(
    store: &dyn ContentStore,
    manifest: &Manifest,
) -> StoreResult<()> {
    let hashes = manifest.blob_hashes();
    let mut missing = Vec::new();
    for chunk in hashes.chunks(store.exists_batch_limit().max(1)) {
        missing.extend(store.exists(chunk).await?.missing);
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::ManifestInvalid { missing })
    }
}
