//! Export manifest: the self-describing index of a package.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::canonical::encode_canonical;
use crate::digest::{Digest, GroupId};
use crate::error::CoreError;
use crate::time::{self, Timestamp};

/// An inclusive, 1-based span of ledger sequence numbers.
///
/// Deserialization applies the same checks as [`LedgerRange::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct LedgerRange {
    pub from: u64,
    pub to: u64,
}

#[derive(Deserialize)]
struct RawRange {
    from: u64,
    to: u64,
}

impl TryFrom<RawRange> for LedgerRange {
    type Error = CoreError;

    fn try_from(raw: RawRange) -> Result<Self, CoreError> {
        LedgerRange::new(raw.from, raw.to)
    }
}

impl LedgerRange {
    /// Create a range, rejecting `from == 0` and `from > to`.
    pub fn new(from: u64, to: u64) -> Result<Self, CoreError> {
        if from == 0 || from > to {
            return Err(CoreError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Number of sequence numbers covered; 0 for a reversed range built
    /// directly from its fields.
    pub fn len(&self) -> u64 {
        self.to
            .checked_sub(self.from)
            .map_or(0, |span| span.saturating_add(1))
    }

    /// Ranges are never empty once constructed through [`LedgerRange::new`].
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn contains(&self, seq: u64) -> bool {
        (self.from..=self.to).contains(&seq)
    }
}

/// The manifest embedded in every export package.
///
/// `package_hash` covers the manifest itself, serialized with the
/// `package_hash` field set to the genesis placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub manifest_id: Digest,

    /// Supplied by the caller, never read from the clock.
    #[serde(with = "time::rfc3339")]
    pub generated_at: Timestamp,

    /// Sorted, deduplicated.
    pub included_digests: Vec<Digest>,

    pub included_ledger_range: LedgerRange,

    /// Sealed groups bundled in `groups.json`, sorted.
    #[serde(default)]
    pub included_groups: Vec<GroupId>,

    /// Hash embedded in `statement.txt`, or genesis when no statement is
    /// bundled.
    pub rendered_summary_hash: Digest,

    pub package_hash: Digest,
}

impl ExportManifest {
    /// Manifest bytes as written to `manifest.json`.
    pub fn to_json(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec_pretty(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
    }

    /// Manifest bytes with `package_hash` masked, as covered by the package
    /// hash.
    pub fn masked_json(&self) -> Result<Vec<u8>, CoreError> {
        let masked = Self {
            package_hash: Digest::GENESIS,
            ..self.clone()
        };
        masked.to_json()
    }

    pub fn has_statement(&self) -> bool {
        !self.rendered_summary_hash.is_genesis()
    }

    /// Recompute the id from the request fields.
    pub fn expected_id(&self) -> Result<Digest, CoreError> {
        manifest_id(
            &self.included_digests,
            self.included_ledger_range,
            &self.included_groups,
            &self.generated_at,
        )
    }
}

/// Derive a manifest id: a pure function of the export request.
///
/// Inputs are expected already normalized (sorted, deduplicated).
pub fn manifest_id(
    digests: &[Digest],
    range: LedgerRange,
    groups: &[GroupId],
    generated_at: &Timestamp,
) -> Result<Digest, CoreError> {
    let request = Value::Map(vec![
        (
            Value::Integer(0.into()),
            Value::Array(
                digests
                    .iter()
                    .map(|d| Value::Bytes(d.as_bytes().to_vec()))
                    .collect(),
            ),
        ),
        (
            Value::Integer(1.into()),
            Value::Array(vec![
                Value::Integer(range.from.into()),
                Value::Integer(range.to.into()),
            ]),
        ),
        (
            Value::Integer(2.into()),
            Value::Array(
                groups
                    .iter()
                    .map(|g| Value::Bytes(g.as_subject().as_bytes().to_vec()))
                    .collect(),
            ),
        ),
        (
            Value::Integer(3.into()),
            Value::Text(time::format(generated_at)),
        ),
    ]);
    let bytes = encode_canonical(&request)?;
    Ok(Digest::derive(crate::domain::MANIFEST, &bytes))
}
