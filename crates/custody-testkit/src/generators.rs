//! Proptest generators for property-based testing.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use custody_core::{
    Accessor, Digest, EntryDraft, EventKind, GroupId, LedgerEntry, OffsetMetadata, Timestamp,
};

/// Generate a random Digest.
pub fn digest() -> impl Strategy<Value = Digest> {
    any::<[u8; 32]>().prop_map(Digest::from_bytes)
}

/// Generate a random GroupId.
pub fn group_id() -> impl Strategy<Value = GroupId> {
    any::<[u8; 32]>().prop_map(GroupId::from_bytes)
}

/// Generate an EventKind.
pub fn event_kind() -> impl Strategy<Value = EventKind> {
    prop::sample::select(EventKind::ALL.to_vec())
}

/// Generate a non-blank identity or purpose string.
pub fn name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,23}".prop_map(String::from)
}

pub fn accessor() -> impl Strategy<Value = Accessor> {
    (name(), name()).prop_filter_map("accessor fields are non-blank", |(actor, purpose)| {
        Accessor::new(actor, purpose).ok()
    })
}

/// Generate a timestamp between 2000 and 2100, microsecond precision.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (946_684_800i64..4_102_444_800i64, 0u32..1_000_000u32).prop_filter_map(
        "timestamp in range",
        |(secs, micros)| DateTime::<Utc>::from_timestamp(secs, micros * 1_000),
    )
}

/// Generate offset metadata, sometimes labelled.
pub fn offset() -> impl Strategy<Value = OffsetMetadata> {
    (-3_600_000i64..3_600_000i64, proptest::option::of(name())).prop_map(|(ms, label)| {
        let offset = OffsetMetadata::new(ms);
        match label {
            Some(label) => offset.with_label(label),
            None => offset,
        }
    })
}

/// Generate content bytes of at most `max_len`.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for one ledger entry.
#[derive(Debug, Clone)]
pub struct EntryParams {
    pub kind: EventKind,
    pub subject: Digest,
    pub accessor: Accessor,
    pub occurred_at: Timestamp,
    pub recorded_at: Timestamp,
    pub detail: Option<String>,
}

impl Arbitrary for EntryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            event_kind(),
            digest(),
            accessor(),
            timestamp(),
            0i64..86_400_000i64, // recording lag
            proptest::option::of("[ -~]{0,64}"),
        )
            .prop_map(|(kind, subject, accessor, occurred_at, lag_ms, detail)| EntryParams {
                kind,
                subject,
                accessor,
                occurred_at,
                recorded_at: occurred_at + chrono::Duration::milliseconds(lag_ms),
                detail,
            })
            .boxed()
    }
}

/// Finalize one entry at a given position.
pub fn entry_from_params(params: &EntryParams, seq: u64, prior: Digest) -> LedgerEntry {
    let mut draft = EntryDraft::new(params.kind, params.subject, &params.accessor)
        .occurred_at(params.occurred_at);
    if let Some(detail) = &params.detail {
        draft = draft.detail(detail.clone());
    }
    draft
        .finalize(seq, prior, params.recorded_at)
        .expect("generated entries encode")
}

/// Link a sequence of parameters into a valid chain starting at genesis.
pub fn chain_from_params(params: &[EntryParams]) -> Vec<LedgerEntry> {
    let mut prior = Digest::GENESIS;
    params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let entry = entry_from_params(p, i as u64 + 1, prior);
            prior = entry.this_entry_hash;
            entry
        })
        .collect()
}
