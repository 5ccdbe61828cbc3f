//! Proptest generators for property-based testing.

use proptest::prelude::*;

use dropline_core::{CatalogEntry, FileId, LocalFile, PeerId};

/// File contents up to `max_len` bytes, empty included.
pub fn file_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A positive chunk size.
pub fn chunk_size() -> impl Strategy<Value = usize> {
    1usize..=64
}

/// A plausible file name.
pub fn file_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}\\.(txt|bin|png|pdf)".prop_map(String::from)
}

/// A peer id as the relay would hand out.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    "[0-9a-f]{32}".prop_map(PeerId::new)
}

/// A local file to share.
pub fn local_file(max_len: usize) -> impl Strategy<Value = LocalFile> {
    (file_name(), file_bytes(max_len), 0i64..=1_800_000_000_000i64).prop_map(
        |(name, bytes, last_modified)| LocalFile {
            name,
            file_type: "application/octet-stream".into(),
            last_modified,
            bytes: bytes.into(),
        },
    )
}

/// A remote listing, as another peer would advertise it.
pub fn catalog_entry() -> impl Strategy<Value = CatalogEntry> {
    (
        any::<[u8; 32]>(),
        peer_id(),
        file_name(),
        0u64..=1 << 30,
        any::<bool>(),
        0u64..=1000,
    )
        .prop_map(
            |(digest, owner_id, file_name, file_size, with_password, total_downloads)| {
                CatalogEntry {
                    id: FileId::from_digest(&digest),
                    owner_id,
                    device_name: "generated".into(),
                    file_name,
                    file_size,
                    with_password,
                    total_downloads,
                    ..Default::default()
                }
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dropline_core::{chunker, compute_identity, progress_percent};

    proptest! {
        #[test]
        fn test_join_split_law(data in file_bytes(1024), size in chunk_size()) {
            let data = Bytes::from(data);
            let chunks = chunker::split(&data, size).unwrap();

            prop_assert_eq!(chunker::join(&chunks), data.clone());
            prop_assert_eq!(chunks.len(), chunker::chunk_count(data.len(), size));
            // Only the last chunk may be short, and never empty unless the file is.
            for chunk in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(chunk.len(), size);
            }
            prop_assert!(!chunks[chunks.len() - 1].is_empty() || data.is_empty());
        }

        #[test]
        fn test_identity_is_deterministic(data in file_bytes(512)) {
            prop_assert_eq!(compute_identity(&data), compute_identity(&data));
        }

        #[test]
        fn test_single_byte_mutation_changes_identity(
            data in file_bytes(512),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            prop_assume!(!data.is_empty());
            let mut mutated = data.clone();
            let i = position.index(mutated.len());
            mutated[i] ^= flip;

            prop_assert_ne!(compute_identity(&data), compute_identity(&mutated));
        }

        #[test]
        fn test_progress_ends_at_100(total in 1u32..=10_000) {
            prop_assert_eq!(progress_percent(total, total), 100);
            let mut last = 0;
            for current in 1..=total.min(200) {
                let percent = progress_percent(current, total);
                prop_assert!(percent >= last);
                last = percent;
            }
        }

        #[test]
        fn test_generated_files_stay_in_bounds(file in local_file(256)) {
            prop_assert!(file.size() <= 256);
            prop_assert!(!file.name.is_empty());
        }
    }
}
