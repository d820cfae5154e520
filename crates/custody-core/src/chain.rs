//! Single-pass hash chain verification.
//!
//! Sequence numbers and hash linkage are two independent tamper signals: a
//! reordering breaks the sequence, a content edit breaks the hash even when
//! the sequence is preserved. The verifier checks both in one linear pass and
//! needs no anchor beyond the genesis constant.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::entry::LedgerEntry;
use crate::error::CoreError;

/// What broke the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum ChainFault {
    /// A sequence number is missing, repeated or out of order.
    SequenceGap { expected: u64, found: u64 },

    /// `prior_entry_hash` does not equal the previous `this_entry_hash`.
    PriorHashMismatch { expected: Digest, found: Digest },

    /// The stored hash does not match the recomputed one.
    EntryHashMismatch { stored: Digest, recomputed: Digest },

    /// The stored row could not be read back as an entry at all.
    Undecodable { reason: String },
}

/// Outcome of a chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub valid: bool,

    /// Sequence number of the first broken entry.
    pub break_at: Option<u64>,

    /// Number of entries examined, including the broken one.
    pub checked: u64,

    pub fault: Option<ChainFault>,
}

impl ChainReport {
    /// Report for an empty range.
    pub fn empty() -> Self {
        Self {
            valid: true,
            break_at: None,
            checked: 0,
            fault: None,
        }
    }
}

/// Incremental chain verifier.
///
/// Feed entries in order with [`ChainVerifier::push`]; the first fault is
/// latched and later entries are ignored.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    next_seq: u64,
    prior: Option<Digest>,
    checked: u64,
    broken: Option<(u64, ChainFault)>,
}

impl ChainVerifier {
    /// Verifier anchored at genesis: the first entry must be seq 1 with a
    /// genesis prior hash.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            prior: Some(Digest::GENESIS),
            checked: 0,
            broken: None,
        }
    }

    /// Verifier for a slice that starts at `first_seq` whose predecessor is
    /// not available. The first entry's `prior_entry_hash` is accepted as
    /// given; every later link is checked.
    pub fn unanchored(first_seq: u64) -> Self {
        Self {
            next_seq: first_seq,
            prior: None,
            checked: 0,
            broken: None,
        }
    }

    /// Check the next entry.
    pub fn push(&mut self, entry: &LedgerEntry) -> Result<(), CoreError> {
        if self.broken.is_some() {
            return Ok(());
        }
        self.checked += 1;

        let seq = entry.sequence_number;
        if seq != self.next_seq {
            self.broken = Some((
                self.next_seq,
                ChainFault::SequenceGap {
                    expected: self.next_seq,
                    found: seq,
                },
            ));
            return Ok(());
        }

        if let Some(expected) = self.prior {
            if entry.prior_entry_hash != expected {
                self.broken = Some((
                    seq,
                    ChainFault::PriorHashMismatch {
                        expected,
                        found: entry.prior_entry_hash,
                    },
                ));
                return Ok(());
            }
        }

        let recomputed = entry.compute_hash()?;
        if recomputed != entry.this_entry_hash {
            self.broken = Some((
                seq,
                ChainFault::EntryHashMismatch {
                    stored: entry.this_entry_hash,
                    recomputed,
                },
            ));
            return Ok(());
        }

        self.next_seq = seq + 1;
        self.prior = Some(entry.this_entry_hash);
        Ok(())
    }

    /// Record that the entry at `seq` exists but could not be decoded.
    ///
    /// If entries before `seq` are missing the break is a sequence gap at
    /// the first missing number instead.
    pub fn undecodable(&mut self, seq: u64, reason: impl Into<String>) {
        if self.broken.is_some() {
            return;
        }
        self.checked += 1;
        let fault = if seq == self.next_seq {
            ChainFault::Undecodable {
                reason: reason.into(),
            }
        } else {
            ChainFault::SequenceGap {
                expected: self.next_seq,
                found: seq,
            }
        };
        self.broken = Some((self.next_seq, fault));
    }

    /// Whether a fault has been found.
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Hash of the last verified entry.
    pub fn last_hash(&self) -> Option<Digest> {
        self.prior
    }

    /// Sequence number the next entry must carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn finish(self) -> ChainReport {
        match self.broken {
            Some((at, fault)) => ChainReport {
                valid: false,
                break_at: Some(at),
                checked: self.checked,
                fault: Some(fault),
            },
            None => ChainReport {
                valid: true,
                break_at: None,
                checked: self.checked,
                fault: None,
            },
        }
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a full ledger from genesis.
pub fn verify_entries<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Result<ChainReport, CoreError> {
    let mut verifier = ChainVerifier::new();
    for entry in entries {
        verifier.push(entry)?;
        if verifier.is_broken() {
            break;
        }
    }
    Ok(verifier.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryDraft;
    use crate::event::EventKind;
    use crate::time;
    use crate::types::Accessor;

    fn build_chain(n: u64) -> Vec<LedgerEntry> {
        let accessor = Accessor::new("alice", "review").unwrap();
        let ts = time::parse("2026-01-14T12:00:00Z").unwrap();
        let mut prior = Digest::GENESIS;
        let mut out = Vec::new();
        for seq in 1..=n {
            let entry = EntryDraft::new(EventKind::Accessed, Digest::hash(&seq.to_be_bytes()), &accessor)
                .finalize(seq, prior, ts)
                .unwrap();
            prior = entry.this_entry_hash;
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_valid_chain() {
        let chain = build_chain(5);
        let report = verify_entries(&chain).unwrap();
        assert!(report.valid);
        assert_eq!(report.checked, 5);
        assert_eq!(report.break_at, None);
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_entries(std::iter::empty()).unwrap();
        assert_eq!(report, ChainReport::empty());
    }

    #[test]
    fn test_content_tamper_detected_at_entry() {
        let mut chain = build_chain(5);
        chain[2].actor_identity = "mallory".into();
        let report = verify_entries(&chain).unwrap();
        assert!(!report.valid);
        assert_eq!(report.break_at, Some(3));
        assert!(matches!(report.fault, Some(ChainFault::EntryHashMismatch { .. })));
    }

    #[test]
    fn test_rehashed_tamper_detected_at_successor() {
        let mut chain = build_chain(5);
        chain[2].purpose = "curiosity".into();
        chain[2].this_entry_hash = chain[2].compute_hash().unwrap();
        let report = verify_entries(&chain).unwrap();
        assert_eq!(report.break_at, Some(4));
        assert!(matches!(report.fault, Some(ChainFault::PriorHashMismatch { .. })));
    }

    #[test]
    fn test_reorder_detected() {
        let mut chain = build_chain(4);
        chain.swap(1, 2);
        let report = verify_entries(&chain).unwrap();
        assert_eq!(report.break_at, Some(2));
        assert_eq!(
            report.fault,
            Some(ChainFault::SequenceGap { expected: 2, found: 3 })
        );
    }

    #[test]
    fn test_missing_entry_detected() {
        let mut chain = build_chain(4);
        chain.remove(1);
        let report = verify_entries(&chain).unwrap();
        assert_eq!(report.break_at, Some(2));
    }

    #[test]
    fn test_first_entry_must_anchor_at_genesis() {
        let chain = build_chain(3);
        let report = verify_entries(&chain[1..]).unwrap();
        assert_eq!(report.break_at, Some(1));
    }

    #[test]
    fn test_undecodable_entry_breaks_at_its_seq() {
        let chain = build_chain(4);
        let mut verifier = ChainVerifier::new();
        for entry in &chain[..2] {
            verifier.push(entry).unwrap();
        }
        verifier.undecodable(3, "unknown event kind");
        verifier.push(&chain[3]).unwrap();
        let report = verifier.finish();
        assert_eq!(report.break_at, Some(3));
        assert_eq!(report.checked, 3);
        assert!(matches!(report.fault, Some(ChainFault::Undecodable { .. })));

        // A hole before the unreadable row is reported first.
        let mut verifier = ChainVerifier::new();
        verifier.push(&chain[0]).unwrap();
        verifier.undecodable(4, "bad timestamp");
        let report = verifier.finish();
        assert_eq!(report.break_at, Some(2));
        assert_eq!(
            report.fault,
            Some(ChainFault::SequenceGap { expected: 2, found: 4 })
        );
    }

    #[test]
    fn test_unanchored_slice() {
        let chain = build_chain(6);
        let mut verifier = ChainVerifier::unanchored(3);
        for entry in &chain[2..5] {
            verifier.push(entry).unwrap();
        }
        let report = verifier.finish();
        assert!(report.valid);
        assert_eq!(report.checked, 3);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_any_byte_flip_breaks_at_or_before(
                n in 1u64..12,
                victim in any::<prop::sample::Index>(),
                byte in 0usize..32,
            ) {
                let mut chain = build_chain(n);
                let i = victim.index(chain.len());
                chain[i].subject_digest.0[byte] ^= 0x01;

                let report = verify_entries(&chain).unwrap();
                prop_assert!(!report.valid);
                prop_assert!(report.break_at.unwrap() <= chain[i].sequence_number);
            }

            #[test]
            fn prop_intact_chain_always_valid(n in 0u64..20) {
                let chain = build_chain(n);
                let report = verify_entries(&chain).unwrap();
                prop_assert!(report.valid);
                prop_assert_eq!(report.checked, n);
            }
        }
    }
}
