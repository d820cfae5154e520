//! Entry validation: structural checks and predecessor linkage.

use crate::digest::Digest;
use crate::entry::LedgerEntry;
use crate::error::ValidationError;

/// Validate an entry's structure (without checking its predecessor).
///
/// This performs:
/// - Sequence number check (1-indexed)
/// - Genesis rule: seq 1 if and only if the prior hash is the genesis constant
/// - Required fields
/// - Hash recomputation
pub fn validate_entry(entry: &LedgerEntry) -> Result<(), ValidationError> {
    if entry.sequence_number == 0 {
        return Err(ValidationError::InvalidSequence {
            expected: 1,
            got: 0,
        });
    }

    let is_first = entry.sequence_number == 1;
    if is_first != entry.prior_entry_hash.is_genesis() {
        return Err(ValidationError::StructuralError(if is_first {
            "seq 1 requires the genesis prior hash".into()
        } else {
            "only seq 1 may carry the genesis prior hash".into()
        }));
    }

    if entry.actor_identity.trim().is_empty() {
        return Err(ValidationError::MissingField("actor_identity"));
    }
    if entry.purpose.trim().is_empty() {
        return Err(ValidationError::MissingField("purpose"));
    }

    let recomputed = entry.compute_hash()?;
    if recomputed != entry.this_entry_hash {
        return Err(ValidationError::EntryHashMismatch {
            seq: entry.sequence_number,
            stored: entry.this_entry_hash,
            recomputed,
        });
    }

    Ok(())
}

/// Validate that `entry` extends a ledger whose head is `head`
/// (`None` for an empty ledger).
pub fn validate_successor(
    head: Option<(u64, Digest)>,
    entry: &LedgerEntry,
) -> Result<(), ValidationError> {
    let (expected_seq, expected_prior) = match head {
        Some((seq, hash)) => (seq + 1, hash),
        None => (1, Digest::GENESIS),
    };

    if entry.sequence_number != expected_seq {
        return Err(ValidationError::InvalidSequence {
            expected: expected_seq,
            got: entry.sequence_number,
        });
    }
    if entry.prior_entry_hash != expected_prior {
        return Err(ValidationError::PriorHashMismatch {
            seq: entry.sequence_number,
            expected: expected_prior,
            got: entry.prior_entry_hash,
        });
    }

    validate_entry(entry)
}
