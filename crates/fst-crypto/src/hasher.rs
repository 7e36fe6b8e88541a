use sha2::{Digest, Sha256};

use fst_types::ContentHash;

/// SHA-256 content hasher.
///
/// There is deliberately no domain separation: the address of a blob is
/// `SHA-256(bytes)` so that clients and the store compute the same value.
pub struct ContentHasher;

impl ContentHasher {
    /// Hash raw bytes.
    pub fn hash(data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(Sha256::digest(data).into())
    }

    /// Verify that data produces the expected hash.
    pub fn verify(data: &[u8], expected: &ContentHash) -> bool {
        Self::hash(data) == *expected
    }

    /// Start an incremental hash for content read in chunks.
    pub fn streaming() -> StreamingHasher {
        StreamingHasher {
            inner: Sha256::new(),
            len: 0,
        }
    }
}

/// Incremental SHA-256 over chunked input (large files).
pub struct StreamingHasher {
    inner: Sha256,
    len: u64,
}

impl StreamingHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash::from_bytes(self.inner.finalize().into())
    }
}
