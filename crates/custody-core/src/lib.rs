//! # Custody Core
//!
//! Pure primitives for evidence custody: digests, hash-chained ledger
//! entries, the sealing state machine, and the export package model.
//!
//! This crate contains no storage and no async runtime. It is pure
//! computation over content-addressed data.
//!
//! ## Key Types
//!
//! - [`Digest`] - 32-byte BLAKE3 digest; content objects are keyed by it
//! - [`LedgerEntry`] - One append-only, hash-chained audit record
//! - [`ChainVerifier`] - Single-pass chain verification from genesis
//! - [`GroupState`] - `Unsealed` or `Sealed`; sealing consumes the unsealed value
//! - [`Package`] - Export file set plus its self-hashing manifest
//!
//! ## Canonicalization
//!
//! Entries are hashed over deterministic CBOR. See the [`canonical`] module.

pub mod canonical;
pub mod chain;
pub mod digest;
pub mod domain;
pub mod entry;
pub mod error;
pub mod event;
pub mod group;
pub mod manifest;
pub mod package;
pub mod statement;
pub mod time;
pub mod types;
pub mod validation;

pub use canonical::{canonical_entry_bytes, encode_canonical, entry_hash};
pub use chain::{verify_entries, ChainFault, ChainReport, ChainVerifier};
pub use digest::{Digest, DigestHasher, GroupId};
pub use entry::{EntryDraft, LedgerEntry};
pub use error::{CoreError, GroupError, ValidationError};
pub use event::EventKind;
pub use group::{
    find_conflicts, GroupRecord, GroupState, MemberRef, OffsetConflict, OffsetMetadata,
    SealedGroup, UnsealedGroup,
};
pub use manifest::{manifest_id, ExportManifest, LedgerRange};
pub use package::{object_path, package_hash, Package, PackageFault, PackageReport};
pub use statement::{render_statement, verify_statement, RenderedStatement, StatementCheck, StatementInput, StatementObject};
pub use time::Timestamp;
pub use types::{Accessor, ContentObject, ObjectRole};
pub use validation::{validate_entry, validate_successor};
