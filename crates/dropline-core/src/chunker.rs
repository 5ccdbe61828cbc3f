//! Fixed-size chunking and reassembly.
//!
//! A file of `len` bytes splits into `ceil(len / chunk_size)` chunks; every
//! chunk but the last is exactly `chunk_size` long. A zero-length file is a
//! single empty chunk, so a transfer always has at least one chunk to send.

use bytes::{Bytes, BytesMut};

use crate::error::{CoreError, Result};

/// Default chunk size: 128 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Split `data` into ordered chunks of `chunk_size` bytes.
///
/// Chunks are zero-copy slices of `data`.
pub fn split(data: &Bytes, chunk_size: usize) -> Result<Vec<Bytes>> {
    if chunk_size == 0 {
        return Err(CoreError::InvalidChunkSize);
    }
    if data.is_empty() {
        return Ok(vec![Bytes::new()]);
    }

    let count = chunk_count(data.len(), chunk_size);
    let mut chunks = Vec::with_capacity(count);
    for i in 0..count {
        let begin = i * chunk_size;
        let end = (begin + chunk_size).min(data.len());
        chunks.push(data.slice(begin..end));
    }
    Ok(chunks)
}

/// Concatenate chunks in order.
pub fn join<B: AsRef<[u8]>>(chunks: &[B]) -> Bytes {
    let total = chunks.iter().map(|c| c.as_ref().len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }
    out.freeze()
}

/// Number of chunks a file of `len` bytes splits into.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if len == 0 || chunk_size == 0 {
        1
    } else {
        len.div_ceil(chunk_size)
    }
}
