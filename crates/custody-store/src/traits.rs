//! Storage traits: the abstract interfaces for ledger, object and group
//! persistence.
//!
//! These traits keep the custody layer storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use custody_core::{ContentObject, Digest, EventKind, GroupId, GroupRecord, LedgerEntry, Timestamp};

use crate::error::Result;

/// Result of appending a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The entry was committed.
    Appended,
    /// Another writer already holds this sequence number.
    SequenceTaken {
        /// `this_entry_hash` of the entry at that position.
        existing: Digest,
    },
}

/// Result of indexing a content object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The object was new.
    Inserted,
    /// An object with this digest is already indexed (idempotent, not an error).
    AlreadyExists(ContentObject),
}

/// Filter for ledger queries.
///
/// Filtering never affects chain verification, which always reads the full
/// sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub subject: Option<Digest>,
    /// Empty means any kind.
    pub kinds: Vec<EventKind>,
    /// Inclusive lower bound on `occurred_at`.
    pub since: Option<Timestamp>,
    /// Exclusive upper bound on `occurred_at`.
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, digest: Digest) -> Self {
        self.subject = Some(digest);
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: Timestamp) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an entry passes the filter (ignores `limit`).
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(subject) = &self.subject {
            if &entry.subject_digest != subject {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&entry.event_kind) {
            return false;
        }
        if let Some(since) = &self.since {
            if entry.occurred_at < *since {
                return false;
            }
        }
        if let Some(until) = &self.until {
            if entry.occurred_at >= *until {
                return false;
            }
        }
        true
    }
}

/// Append-only ledger persistence.
///
/// All methods are async to support both blocking (SQLite) and in-memory
/// backends. For SQLite, `spawn_blocking` is used internally.
///
/// # Design Notes
///
/// - **No updates, no deletes**: the trait has no way to change a committed entry.
/// - **Sequence guard**: `append_entry` refuses a sequence number that is
///   already taken. This is the optimistic check behind the writer lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a finalized entry.
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendResult>;

    /// The entry with the highest sequence number.
    async fn head(&self) -> Result<Option<LedgerEntry>>;

    async fn get_entry(&self, seq: u64) -> Result<Option<LedgerEntry>>;

    /// Entries with `from <= seq <= to`, ordered by seq.
    async fn entries_range(&self, from: u64, to: u64) -> Result<Vec<LedgerEntry>>;

    /// Entries matching a filter, ordered by seq.
    async fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>>;

    async fn count(&self) -> Result<u64>;
}

/// Metadata index of committed content objects.
///
/// A row is written only after the blob is committed, so an indexed object
/// always has bytes behind it.
#[async_trait]
pub trait ObjectIndex: Send + Sync {
    async fn insert_object(&self, object: &ContentObject) -> Result<InsertResult>;

    async fn get_object(&self, digest: &Digest) -> Result<Option<ContentObject>>;

    /// All objects, ordered by digest.
    async fn list_objects(&self) -> Result<Vec<ContentObject>>;
}

/// Durable group state, so sealed groups survive a restart.
///
/// A sealed row is frozen: rewriting or removing it returns
/// [`StoreError::GroupFrozen`](crate::StoreError::GroupFrozen).
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Insert a new group. Returns `false` if the id is already stored.
    async fn insert_group(&self, record: &GroupRecord) -> Result<bool>;

    /// Replace the stored state of an existing group.
    async fn update_group(&self, record: &GroupRecord) -> Result<()>;

    /// Drop an unsealed group whose creation could not be recorded.
    async fn remove_group(&self, group: &GroupId) -> Result<()>;

    /// All stored groups, ordered by id.
    async fn load_groups(&self) -> Result<Vec<GroupRecord>>;
}

/// Extension trait for common ledger patterns.
pub trait LedgerStoreExt: LedgerStore {
    /// The next sequence number and the prior hash it must link to.
    fn append_position(&self) -> impl std::future::Future<Output = Result<(u64, Digest)>> + Send;
}

impl<S: LedgerStore + ?Sized> LedgerStoreExt for S {
    async fn append_position(&self) -> Result<(u64, Digest)> {
        Ok(match self.head().await? {
            Some(head) => (head.sequence_number + 1, head.this_entry_hash),
            None => (1, Digest::GENESIS),
        })
    }
}
