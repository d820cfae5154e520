//! # Custody Store
//!
//! Storage for the custody subsystem: content-addressed blobs, the
//! append-only ledger, and the object index.
//!
//! ## Key Types
//!
//! - [`BlobStore`] - Stage-then-commit storage of immutable bytes by digest
//! - [`FsBlobStore`] / [`MemoryBlobStore`] - Filesystem and in-memory blob backends
//! - [`LedgerStore`] - Async append-only ledger persistence
//! - [`ObjectIndex`] - Async metadata index of committed objects
//! - [`GroupStore`] - Async group persistence; sealed rows are frozen
//! - [`SqliteStore`] / [`MemoryStore`] - Ledger and index backends
//!
//! ## Design Notes
//!
//! - **Atomic visibility**: a blob becomes visible only through an atomic
//!   no-clobber rename; its index row is written after that.
//! - **Sequence guard**: a second entry at a taken sequence number returns
//!   `SequenceTaken` rather than overwriting.
//! - **Append-only**: SQLite triggers reject `UPDATE` and `DELETE` on ledger rows
//!   and on the rows of sealed groups.

pub mod blob;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use blob::{BlobStore, CommitOutcome, FsBlobStore, MemoryBlobStore, StagedBlob};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AppendResult, EntryFilter, GroupStore, InsertResult, LedgerStore, LedgerStoreExt,
    ObjectIndex,
};
