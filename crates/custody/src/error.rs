//! Error types for the custody subsystem.
//!
//! Every failure maps onto an [`ErrorKind`] so callers can branch on the
//! class of failure without matching each variant.

use custody_core::{CoreError, Digest, GroupError, GroupId, OffsetConflict, ValidationError};
use custody_store::StoreError;
use thiserror::Error;

/// Coarse failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient; the caller may retry.
    StorageUnavailable,
    /// A computed hash did not match. Fatal and never corrected.
    IntegrityViolation,
    /// Mutation of sealed metadata.
    GroupSealed,
    /// The ledger has a discontinuity.
    ChainBreak,
    /// A referenced digest is not stored.
    MissingContent,
    /// The request conflicts with existing state.
    Conflict,
    /// A referenced group or member does not exist.
    NotFound,
    /// The request itself is malformed.
    InvalidRequest,
    /// The caller cancelled the operation.
    Cancelled,
    /// Stored data could not be encoded or decoded.
    Internal,
}

/// Errors returned by custody operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// The storage backend failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    /// Stored bytes no longer hash to their digest.
    #[error("integrity violation for {digest}: expected {expected}, actual {actual}")]
    IntegrityViolation {
        digest: Digest,
        expected: Digest,
        actual: Digest,
    },

    #[error("group {0} is sealed")]
    GroupSealed(GroupId),

    #[error("ledger chain broken at seq {at}")]
    ChainBreak { at: u64 },

    #[error("content not found: {0}")]
    MissingContent(Digest),

    /// Sealing would freeze offsets that disagree with another sealed group.
    #[error("seal of group {group} conflicts with {} sealed member(s)", conflicts.len())]
    SealConflict {
        group: GroupId,
        conflicts: Vec<OffsetConflict>,
    },

    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("group already exists: {0}")]
    GroupExists(GroupId),

    #[error("group {0} is not sealed")]
    GroupNotSealed(GroupId),

    #[error("member {member} not found in group {group}")]
    MemberNotFound { group: GroupId, member: Digest },

    #[error("member {member} already in group {group}")]
    DuplicateMember { group: GroupId, member: Digest },

    /// The ledger range is empty, reversed or past the head.
    #[error("invalid ledger range {from}..={to} (head {head})")]
    InvalidRange { from: u64, to: u64, head: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            CustodyError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            CustodyError::GroupSealed(_) => ErrorKind::GroupSealed,
            CustodyError::ChainBreak { .. } => ErrorKind::ChainBreak,
            CustodyError::MissingContent(_) => ErrorKind::MissingContent,
            CustodyError::SealConflict { .. }
            | CustodyError::GroupExists(_)
            | CustodyError::DuplicateMember { .. } => ErrorKind::Conflict,
            CustodyError::GroupNotFound(_)
            | CustodyError::GroupNotSealed(_)
            | CustodyError::MemberNotFound { .. } => ErrorKind::NotFound,
            CustodyError::InvalidRange { .. } | CustodyError::InvalidRequest(_) => {
                ErrorKind::InvalidRequest
            }
            CustodyError::Cancelled => ErrorKind::Cancelled,
            CustodyError::Encoding(_) => ErrorKind::Internal,
        }
    }

    /// Whether a local retry with backoff is allowed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CustodyError::StorageUnavailable(e) if e.is_transient())
    }
}

impl From<StoreError> for CustodyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(digest) => CustodyError::MissingContent(digest),
            StoreError::Corrupt { seq, .. } => CustodyError::ChainBreak { at: seq },
            StoreError::GroupFrozen(group) => CustodyError::GroupSealed(group),
            other => CustodyError::StorageUnavailable(other),
        }
    }
}

impl From<CoreError> for CustodyError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MissingField(_)
            | CoreError::UnknownEventKind(_)
            | CoreError::InvalidTimestamp(_)
            | CoreError::InvalidDigest(_) => CustodyError::InvalidRequest(e.to_string()),
            CoreError::InvalidRange { from, to } => CustodyError::InvalidRange { from, to, head: 0 },
            other => CustodyError::Encoding(other.to_string()),
        }
    }
}

impl From<ValidationError> for CustodyError {
    fn from(e: ValidationError) -> Self {
        CustodyError::Encoding(e.to_string())
    }
}

impl From<GroupError> for CustodyError {
    fn from(e: GroupError) -> Self {
        match e {
            GroupError::Sealed(group) => CustodyError::GroupSealed(group),
            GroupError::DuplicateMember { group, member } => {
                CustodyError::DuplicateMember { group, member }
            }
            GroupError::MemberNotFound { group, member } => {
                CustodyError::MemberNotFound { group, member }
            }
            GroupError::Inconsistent(group) => {
                CustodyError::Encoding(format!("group record {group} is inconsistent"))
            }
        }
    }
}

impl From<tokio::task::JoinError> for CustodyError {
    fn from(e: tokio::task::JoinError) -> Self {
        CustodyError::StorageUnavailable(StoreError::from(e))
    }
}

/// Result type for custody operations.
pub type Result<T> = std::result::Result<T, CustodyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_is_missing_content() {
        let digest = Digest::hash(b"gone");
        let err = CustodyError::from(StoreError::NotFound(digest));
        assert_eq!(err.kind(), ErrorKind::MissingContent);
    }

    #[test]
    fn test_corrupt_row_is_chain_break() {
        let err = CustodyError::from(StoreError::Corrupt {
            seq: 7,
            reason: "unknown event kind: accessex".into(),
        });
        assert!(matches!(err, CustodyError::ChainBreak { at: 7 }));
        assert_eq!(err.kind(), ErrorKind::ChainBreak);
        assert!(!err.is_retryable());

        let group = GroupId::derive("g1");
        let err = CustodyError::from(StoreError::GroupFrozen(group));
        assert_eq!(err.kind(), ErrorKind::GroupSealed);
    }

    #[test]
    fn test_transient_io_is_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err = CustodyError::from(StoreError::Io(io));
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.is_retryable());

        let err = CustodyError::from(StoreError::InvalidData("bad row".into()));
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_group_errors_map_to_kinds() {
        let group = GroupId::derive("g1");
        let member = Digest::hash(b"m");
        assert_eq!(
            CustodyError::from(GroupError::Sealed(group)).kind(),
            ErrorKind::GroupSealed
        );
        assert_eq!(
            CustodyError::from(GroupError::DuplicateMember { group, member }).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CustodyError::from(GroupError::MemberNotFound { group, member }).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_integrity_is_not_retryable() {
        let d = Digest::hash(b"x");
        let err = CustodyError::IntegrityViolation {
            digest: d,
            expected: d,
            actual: Digest::hash(b"y"),
        };
        assert_eq!(err.kind(), ErrorKind::IntegrityViolation);
        assert!(!err.is_retryable());
    }
}
