//! Ledger entry: one append-only audit record.
//!
//! An entry is immutable once finalized. Corrections are new entries whose
//! `detail` references the entry they correct.

use serde::{Deserialize, Serialize};

use crate::canonical::entry_hash;
use crate::digest::Digest;
use crate::error::CoreError;
use crate::event::EventKind;
use crate::time::{self, Timestamp};
use crate::types::Accessor;

/// A finalized, hash-chained ledger entry.
///
/// `this_entry_hash` covers every other field, including `prior_entry_hash`,
/// `recorded_at` and `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger (1-indexed, gapless).
    pub sequence_number: u64,

    pub event_kind: EventKind,

    /// The content object or metadata object the event concerns.
    pub subject_digest: Digest,

    pub actor_identity: String,

    pub purpose: String,

    /// When the event happened, as claimed by the caller.
    #[serde(with = "time::rfc3339")]
    pub occurred_at: Timestamp,

    /// When the ledger committed the entry.
    #[serde(with = "time::rfc3339")]
    pub recorded_at: Timestamp,

    /// Free-text context such as the denied operation or the package hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// `this_entry_hash` of the previous entry, or genesis for entry 1.
    pub prior_entry_hash: Digest,

    pub this_entry_hash: Digest,
}

impl LedgerEntry {
    /// Recompute the entry hash from the other fields.
    pub fn compute_hash(&self) -> Result<Digest, CoreError> {
        entry_hash(self)
    }

    /// Whether the stored hash matches the recomputed one.
    pub fn hash_matches(&self) -> Result<bool, CoreError> {
        Ok(self.compute_hash()? == self.this_entry_hash)
    }

    /// Whether the entry was recorded more than `tolerance_ms` after it
    /// occurred (replayed or backfilled).
    pub fn is_backfilled(&self, tolerance_ms: i64) -> bool {
        self.backfill_lag_ms() > tolerance_ms
    }

    /// Milliseconds between `occurred_at` and `recorded_at`.
    pub fn backfill_lag_ms(&self) -> i64 {
        (self.recorded_at - self.occurred_at).num_milliseconds()
    }

    /// Check if this is the first entry of the ledger.
    pub fn is_genesis(&self) -> bool {
        self.sequence_number == 1 && self.prior_entry_hash.is_genesis()
    }

    /// Render as one JSON line for a ledger slice.
    pub fn to_json_line(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Parse one JSON line of a ledger slice.
    pub fn from_json_line(line: &str) -> Result<Self, CoreError> {
        serde_json::from_str(line).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// Builder for ledger entries.
///
/// A draft carries everything the caller knows. The ledger supplies the
/// sequence number, the prior hash and `recorded_at` when it finalizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    kind: EventKind,
    subject: Digest,
    actor_identity: String,
    purpose: String,
    occurred_at: Option<Timestamp>,
    detail: Option<String>,
}

impl EntryDraft {
    /// Start a draft for an event about `subject`.
    pub fn new(kind: EventKind, subject: Digest, accessor: &Accessor) -> Self {
        Self {
            kind,
            subject,
            actor_identity: accessor.actor_identity().to_string(),
            purpose: accessor.purpose().to_string(),
            occurred_at: None,
            detail: None,
        }
    }

    /// Set an explicit `occurred_at` (replayed or backfilled events).
    pub fn occurred_at(mut self, ts: Timestamp) -> Self {
        self.occurred_at = Some(time::normalize(ts));
        self
    }

    /// Attach free-text detail.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subject(&self) -> Digest {
        self.subject
    }

    pub fn explicit_occurred_at(&self) -> Option<Timestamp> {
        self.occurred_at
    }

    /// Assign position and compute the hash.
    ///
    /// `occurred_at` defaults to `recorded_at` when not set.
    pub fn finalize(
        self,
        sequence_number: u64,
        prior_entry_hash: Digest,
        recorded_at: Timestamp,
    ) -> Result<LedgerEntry, CoreError> {
        let recorded_at = time::normalize(recorded_at);
        let mut entry = LedgerEntry {
            sequence_number,
            event_kind: self.kind,
            subject_digest: self.subject,
            actor_identity: self.actor_identity,
            purpose: self.purpose,
            occurred_at: self.occurred_at.unwrap_or(recorded_at),
            recorded_at,
            detail: self.detail,
            prior_entry_hash,
            this_entry_hash: Digest::GENESIS,
        };
        entry.this_entry_hash = entry.compute_hash()?;
        Ok(entry)
    }
}
