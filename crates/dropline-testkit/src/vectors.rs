//! Golden test vectors.
//!
//! Content ids are part of the wire format: every peer must derive the same
//! id from the same bytes, and chunk boundaries must agree for a transfer to
//! reassemble. These vectors pin both.

use bytes::Bytes;

use dropline_core::{chunker, compute_identity};

/// A known content id.
#[derive(Debug, Clone)]
pub struct IdentityVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub input: &'static [u8],
    /// Expected file id (hex).
    pub expected_id: &'static str,
}

/// A known chunk layout.
#[derive(Debug, Clone)]
pub struct ChunkVector {
    pub name: &'static str,
    pub len: usize,
    pub chunk_size: usize,
    pub expected_lengths: &'static [usize],
}

/// Get all identity vectors.
pub fn identity_vectors() -> Vec<IdentityVector> {
    vec![
        IdentityVector {
            name: "empty file",
            input: b"",
            expected_id: "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262",
        },
        IdentityVector {
            name: "abc",
            input: b"abc",
            expected_id: "6437b3ac38465133ffb63b75273a8db548c558465d79db03fd359c6cd5bd9d85",
        },
    ]
}

/// Get all chunk layout vectors.
pub fn chunk_vectors() -> Vec<ChunkVector> {
    vec![
        ChunkVector {
            name: "empty file is one empty chunk",
            len: 0,
            chunk_size: 4,
            expected_lengths: &[0],
        },
        ChunkVector {
            name: "shorter than a chunk",
            len: 3,
            chunk_size: 4,
            expected_lengths: &[3],
        },
        ChunkVector {
            name: "exact multiple",
            len: 12,
            chunk_size: 4,
            expected_lengths: &[4, 4, 4],
        },
        ChunkVector {
            name: "remainder in last chunk",
            len: 10,
            chunk_size: 4,
            expected_lengths: &[4, 4, 2],
        },
        ChunkVector {
            name: "default chunk size",
            len: 300 * 1024,
            chunk_size: 128 * 1024,
            expected_lengths: &[131_072, 131_072, 45_056],
        },
    ]
}

/// Verify all identity vectors.
///
/// Returns `(name, matches, actual hex)` for each vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    identity_vectors()
        .iter()
        .map(|v| {
            let id = compute_identity(v.input);
            let matches = id.as_str() == v.expected_id;
            (v.name.to_string(), matches, id.to_string())
        })
        .collect()
}

/// The chunk lengths `split` produces for a vector.
pub fn chunk_lengths(vector: &ChunkVector) -> Vec<usize> {
    let data = Bytes::from(vec![0x5a; vector.len]);
    chunker::split(&data, vector.chunk_size)
        .map(|chunks| chunks.iter().map(Bytes::len).collect())
        .unwrap_or_default()
}
