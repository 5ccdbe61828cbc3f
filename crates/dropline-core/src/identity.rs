//! Content identity for shared files.
//!
//! A file's identity is the Blake3 digest of its complete bytes. The same
//! digest doubles as the end-to-end integrity check once a transfer has been
//! reassembled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::FileId;

/// A 32-byte Blake3 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    /// Compute the digest of the given bytes.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Compute the digest of a sequence of slices as if they were concatenated.
    ///
    /// Lets a reassembled download be verified without first joining it.
    pub fn hash_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The catalog identifier for this digest.
    pub fn file_id(&self) -> FileId {
        FileId::from_digest(&self.0)
    }

    /// Whether this digest is the identity named by `id`.
    pub fn matches(&self, id: &FileId) -> bool {
        self.to_hex() == id.as_str()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ContentDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Compute the content identity of a whole file.
///
/// Deterministic and total: empty input yields the digest of the empty byte
/// sequence.
pub fn compute_identity(bytes: &[u8]) -> FileId {
    ContentDigest::hash(bytes).file_id()
}
