//! # Custody Testkit
//!
//! Testing utilities for the custody crates.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: ledger entries with their exact canonical CBOR bytes
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: temp-dir custody instances and standard accessors
//!
//! ## Golden Vectors
//!
//! ```rust
//! use custody_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hex) in verify_all_vectors().unwrap() {
//!     assert!(matches, "{name}: {hex}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use custody_testkit::generators::{chain_from_params, EntryParams};
//!
//! proptest! {
//!     #[test]
//!     fn chains_verify(params in prop::collection::vec(any::<EntryParams>(), 1..16)) {
//!         let chain = chain_from_params(&params);
//!         prop_assert!(custody_core::verify_entries(&chain).unwrap().valid);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use custody_testkit::fixtures::TestFixture;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fixture = TestFixture::new()?;
//! let digest = fixture.ingest(b"evidence-1", "a.txt").await?;
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{clerk, examiner, fixed_time, memory_custody, TestFixture};
pub use generators::{chain_from_params, entry_from_params, EntryParams};
pub use vectors::{all_vectors, entry_from_vector, verify_all_vectors, GoldenVector};
