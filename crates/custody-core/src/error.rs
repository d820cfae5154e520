//! Error types for the custody core.

use thiserror::Error;

use crate::digest::{Digest, GroupId};

/// Core errors that can occur while building or encoding custody records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid ledger range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("malformed statement: {0}")]
    MalformedStatement(String),

    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

impl From<hex::FromHexError> for CoreError {
    fn from(e: hex::FromHexError) -> Self {
        CoreError::InvalidDigest(e.to_string())
    }
}

/// Validation errors for a single ledger entry against its predecessor.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid sequence number: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },

    #[error("prior_entry_hash mismatch at seq {seq}: expected {expected}, got {got}")]
    PriorHashMismatch {
        seq: u64,
        expected: Digest,
        got: Digest,
    },

    #[error("entry hash mismatch at seq {seq}: stored {stored}, recomputed {recomputed}")]
    EntryHashMismatch {
        seq: u64,
        stored: Digest,
        recomputed: Digest,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MissingField(field) => ValidationError::MissingField(field),
            other => ValidationError::StructuralError(other.to_string()),
        }
    }
}

/// Errors from group membership transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("group {0} is sealed")]
    Sealed(GroupId),

    #[error("object {member} is already a member of group {group}")]
    DuplicateMember { group: GroupId, member: Digest },

    #[error("object {member} is not a member of group {group}")]
    MemberNotFound { group: GroupId, member: Digest },

    /// A stored record whose id, members or snapshot do not agree.
    #[error("group record {0} is inconsistent")]
    Inconsistent(GroupId),
}
