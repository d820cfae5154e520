//! The closed enumeration of ledger event kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The kind of a ledger entry.
///
/// Closed set; extending it is a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ingest,
    IngestDuplicateDetected,
    HashVerified,
    HashVerificationFailed,
    DerivativeCreated,
    Accessed,
    Downloaded,
    Exported,
    GroupCreated,
    GroupSealed,
    MutationDenied,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 11] = [
        EventKind::Ingest,
        EventKind::IngestDuplicateDetected,
        EventKind::HashVerified,
        EventKind::HashVerificationFailed,
        EventKind::DerivativeCreated,
        EventKind::Accessed,
        EventKind::Downloaded,
        EventKind::Exported,
        EventKind::GroupCreated,
        EventKind::GroupSealed,
        EventKind::MutationDenied,
    ];

    /// The wire name used in canonical encoding and JSON.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Ingest => "ingest",
            EventKind::IngestDuplicateDetected => "ingest_duplicate_detected",
            EventKind::HashVerified => "hash_verified",
            EventKind::HashVerificationFailed => "hash_verification_failed",
            EventKind::DerivativeCreated => "derivative_created",
            EventKind::Accessed => "accessed",
            EventKind::Downloaded => "downloaded",
            EventKind::Exported => "exported",
            EventKind::GroupCreated => "group_created",
            EventKind::GroupSealed => "group_sealed",
            EventKind::MutationDenied => "mutation_denied",
        }
    }

    /// Whether this event records a read of evidence content.
    pub fn is_access(self) -> bool {
        matches!(self, EventKind::Accessed | EventKind::Downloaded)
    }

    /// Whether this event concerns a group rather than a content object.
    pub fn is_group_event(self) -> bool {
        matches!(
            self,
            EventKind::GroupCreated | EventKind::GroupSealed | EventKind::MutationDenied
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_string()))
    }
}
