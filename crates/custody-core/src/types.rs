//! Evidence-facing types: who is acting, and what is stored.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::CoreError;
use crate::time::{self, Timestamp};

/// The actor identity and stated purpose attached to every interaction.
///
/// The purpose vocabulary belongs to the caller's access-control layer; it is
/// only required to be present and is recorded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Accessor {
    actor_identity: String,
    purpose: String,
}

impl Accessor {
    /// Create an accessor, rejecting empty fields.
    pub fn new(
        actor_identity: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let actor_identity = actor_identity.into();
        let purpose = purpose.into();
        if actor_identity.trim().is_empty() {
            return Err(CoreError::MissingField("actor_identity"));
        }
        if purpose.trim().is_empty() {
            return Err(CoreError::MissingField("purpose"));
        }
        Ok(Self {
            actor_identity,
            purpose,
        })
    }

    pub fn actor_identity(&self) -> &str {
        &self.actor_identity
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }
}

/// Whether an object is an original or was derived from one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ObjectRole {
    Original,
    Derivative {
        derived_from: Digest,
        /// Free text, e.g. "thumbnail" or "proxy".
        derivation_kind: String,
    },
}

impl ObjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectRole::Original => "original",
            ObjectRole::Derivative { .. } => "derivative",
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, ObjectRole::Original)
    }
}

/// An immutable, content-addressed piece of evidence.
///
/// Created once at first ingest, never updated in place and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    /// BLAKE3 digest of the exact byte stream; the primary key.
    pub digest: Digest,
    pub byte_length: u64,
    pub declared_media_type: String,
    #[serde(with = "time::rfc3339")]
    pub first_seen_at: Timestamp,
    /// Opaque locator understood only by the blob backend.
    pub storage_location: String,
    #[serde(flatten)]
    pub role: ObjectRole,
}

impl ContentObject {
    pub fn is_original(&self) -> bool {
        self.role.is_original()
    }

    /// The parent digest, for derivatives.
    pub fn derived_from(&self) -> Option<&Digest> {
        match &self.role {
            ObjectRole::Original => None,
            ObjectRole::Derivative { derived_from, .. } => Some(derived_from),
        }
    }
}
