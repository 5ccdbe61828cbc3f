//! # Dropline Testkit
//!
//! Testing utilities for Dropline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known content ids and chunk layouts every peer must agree on
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: An in-memory relay network and helpers for end-to-end scenarios
//!
//! ## Golden Vectors
//!
//! ```rust
//! use dropline_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, actual) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, actual);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use dropline_testkit::generators::{chunk_size, file_bytes};
//!
//! proptest! {
//!     #[test]
//!     fn chunks_rejoin(data in file_bytes(1024), size in chunk_size()) {
//!         let data = bytes::Bytes::from(data);
//!         let chunks = dropline_core::split(&data, size).unwrap();
//!         prop_assert_eq!(dropline_core::join(&chunks), data);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use dropline_testkit::fixtures::{sample_file, settle, test_config, TestNetwork};
//!
//! async fn example() -> dropline::Result<()> {
//!     let network = TestNetwork::new();
//!     let mut alice = network.connected_peer("alice", test_config(4)).await?;
//!     let mut bob = network.connected_peer("bob", test_config(4)).await?;
//!
//!     alice.share_files(vec![sample_file("a.bin", 10)]).await?;
//!     settle(&mut [&mut alice, &mut bob]).await?;
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{init_tracing, sample_file, settle, test_config, TestNetwork, TestPeer};
pub use vectors::{chunk_vectors, identity_vectors, verify_all_vectors, ChunkVector, IdentityVector};
