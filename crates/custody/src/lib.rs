//! # Custody
//!
//! Tamper-evident custody for digital evidence: a content-addressed store,
//! a hash-chained audit ledger, a one-way sealing coordinator, and
//! deterministic, self-verifying export packages.
//!
//! ## Overview
//!
//! - **Evidence**: bytes are identified by their BLAKE3 digest, stored
//!   once, and never modified. Every read is ledgered with a purpose.
//! - **Ledger**: an append-only sequence where each entry commits to its
//!   predecessor's hash. Appends are strictly serialized.
//! - **Groups**: sets of evidence with placement offsets, stored alongside
//!   the ledger. Sealing is irreversible, survives a restart, and refused
//!   mutations are themselves ledgered.
//! - **Export**: a package whose manifest, statement and hash are a pure
//!   function of the request, verifiable by a third party holding only
//!   the package.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::io::Cursor;
//! use custody::{Custody, CustodyConfig, ExportRequest, IngestRequest, PackageDir};
//! use custody::core::{time, Accessor, LedgerRange};
//!
//! async fn example() -> custody::Result<()> {
//!     let custody = Custody::open(CustodyConfig::new("/var/lib/custody"))?;
//!     let clerk = Accessor::new("clerk-7", "intake")?;
//!
//!     let put = custody
//!         .evidence()
//!         .put(Cursor::new(b"evidence-1".to_vec()), IngestRequest::new("text/plain", clerk.clone()))
//!         .await?;
//!
//!     let head = custody.ledger().head_seq().await?;
//!     let request = ExportRequest::new(
//!         [put.object.digest],
//!         LedgerRange::new(1, head)?,
//!         time::parse("2026-01-14T12:00:00Z")?,
//!         clerk,
//!     );
//!     let package = custody.export(request).await?;
//!     package.write_to(std::path::Path::new("/tmp/export-1"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `custody::core` - Pure primitives (digests, entries, groups, packages)
//! - `custody::store` - Blob, ledger and index storage

pub mod config;
pub mod coordinator;
pub mod custody;
pub mod error;
pub mod evidence;
pub mod export;
pub mod ledger;
pub mod package_dir;
pub mod retry;

pub use custody_core as core;
pub use custody_store as store;

pub use crate::custody::Custody;
pub use config::CustodyConfig;
pub use coordinator::Coordinator;
pub use error::{CustodyError, ErrorKind, Result};
pub use evidence::{DerivativeRequest, EvidenceStore, IngestRequest, PutOutcome, Verification};
pub use export::{CancelFlag, ExportObserver, ExportProgress, ExportRequest, Exporter, NoopObserver};
pub use ledger::Ledger;
pub use package_dir::PackageDir;
pub use retry::RetryConfig;

pub use custody_core::{
    Accessor, ChainReport, ContentObject, Digest, EventKind, GroupId, GroupRecord, LedgerEntry,
    LedgerRange, OffsetMetadata, Package, PackageReport, SealedGroup,
};
