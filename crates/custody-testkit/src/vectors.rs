//! Golden test vectors for deterministic entry encoding.
//!
//! Each vector pins the exact canonical CBOR bytes of a ledger entry, so any
//! change to field keys, ordering, integer widths or timestamp rendering
//! shows up as a byte diff. The entry hash is the domain-separated BLAKE3
//! of those bytes.

use custody_core::{
    canonical_entry_bytes, domain, time, Accessor, Digest, EntryDraft, EventKind, LedgerEntry,
};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub seq: u64,
    pub kind: EventKind,
    /// Every byte of the subject digest.
    pub subject_byte: u8,
    pub actor: &'static str,
    pub purpose: &'static str,
    pub occurred_at: &'static str,
    pub recorded_at: &'static str,
    /// Every byte of the prior hash; zero means genesis.
    pub prior_byte: u8,
    pub detail: Option<&'static str>,
    /// Expected canonical CBOR (hex).
    pub expected_cbor: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "genesis ingest without detail",
            seq: 1,
            kind: EventKind::Ingest,
            subject_byte: 0x11,
            actor: "clerk-7",
            purpose: "intake",
            occurred_at: "2026-01-14T12:00:00Z",
            recorded_at: "2026-01-14T12:00:00Z",
            prior_byte: 0x00,
            detail: None,
            expected_cbor: concat!(
                "a800010166696e67657374025820",
                "1111111111111111111111111111111111111111111111111111111111111111",
                "0367636c65726b2d370466696e74616b65",
                "05781b323032362d30312d31345431323a30303a30302e3030303030305a",
                "06781b323032362d30312d31345431323a30303a30302e3030303030305a",
                "075820",
                "0000000000000000000000000000000000000000000000000000000000000000",
            ),
        },
        GoldenVector {
            name: "backfilled access with detail",
            seq: 2,
            kind: EventKind::Accessed,
            subject_byte: 0x11,
            actor: "examiner",
            purpose: "case-review",
            occurred_at: "2026-01-14T11:00:00Z",
            recorded_at: "2026-01-14T12:00:01.5Z",
            prior_byte: 0xaa,
            detail: Some("filename=a.txt"),
            expected_cbor: concat!(
                "a9000201686163636573736564025820",
                "1111111111111111111111111111111111111111111111111111111111111111",
                "03686578616d696e6572046b636173652d726576696577",
                "05781b323032362d30312d31345431313a30303a30302e3030303030305a",
                "06781b323032362d30312d31345431323a30303a30312e3530303030305a",
                "075820",
                "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "086e66696c656e616d653d612e747874",
            ),
        },
        GoldenVector {
            name: "denied mutation at a two-byte sequence number",
            seq: 300,
            kind: EventKind::MutationDenied,
            subject_byte: 0x22,
            actor: "bob",
            purpose: "case-prep",
            occurred_at: "2026-01-14T12:00:00Z",
            recorded_at: "2026-01-14T12:00:00Z",
            prior_byte: 0xbb,
            detail: Some("operation=add_member"),
            expected_cbor: concat!(
                "a90019012c016f6d75746174696f6e5f64656e696564025820",
                "2222222222222222222222222222222222222222222222222222222222222222",
                "0363626f620469636173652d70726570",
                "05781b323032362d30312d31345431323a30303a30302e3030303030305a",
                "06781b323032362d30312d31345431323a30303a30302e3030303030305a",
                "075820",
                "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "08746f7065726174696f6e3d6164645f6d656d626572",
            ),
        },
    ]
}

/// Build the entry a vector describes.
pub fn entry_from_vector(vector: &GoldenVector) -> anyhow::Result<LedgerEntry> {
    let accessor = Accessor::new(vector.actor, vector.purpose)?;
    let mut draft = EntryDraft::new(
        vector.kind,
        Digest::from_bytes([vector.subject_byte; 32]),
        &accessor,
    )
    .occurred_at(time::parse(vector.occurred_at)?);
    if let Some(detail) = vector.detail {
        draft = draft.detail(detail);
    }
    Ok(draft.finalize(
        vector.seq,
        Digest::from_bytes([vector.prior_byte; 32]),
        time::parse(vector.recorded_at)?,
    )?)
}

/// Check every vector: `(name, matches, actual hex)`.
pub fn verify_all_vectors() -> anyhow::Result<Vec<(String, bool, String)>> {
    all_vectors()
        .iter()
        .map(|v| {
            let entry = entry_from_vector(v)?;
            let actual = hex::encode(canonical_entry_bytes(&entry)?);
            Ok((v.name.to_string(), actual == v.expected_cbor, actual))
        })
        .collect()
}
