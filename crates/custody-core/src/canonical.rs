//! Canonical CBOR encoding for deterministic hashing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are canonical RFC 3339 text)
//!
//! The canonical encoding is what makes a ledger entry's hash reproducible by
//! a third party: the same fields always produce the same bytes.

use ciborium::value::Value;

use crate::digest::Digest;
use crate::entry::LedgerEntry;
use crate::error::CoreError;
use crate::time;

/// Ledger entry field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const SEQUENCE_NUMBER: u64 = 0;
    pub const EVENT_KIND: u64 = 1;
    pub const SUBJECT_DIGEST: u64 = 2;
    pub const ACTOR_IDENTITY: u64 = 3;
    pub const PURPOSE: u64 = 4;
    pub const OCCURRED_AT: u64 = 5;
    pub const RECORDED_AT: u64 = 6;
    pub const PRIOR_ENTRY_HASH: u64 = 7;
    pub const DETAIL: u64 = 8;
}

/// Encode every hashed field of an entry (all but `this_entry_hash`).
pub fn canonical_entry_bytes(entry: &LedgerEntry) -> Result<Vec<u8>, CoreError> {
    encode_canonical(&entry_to_cbor_value(entry))
}

/// Compute `this_entry_hash` for an entry.
pub fn entry_hash(entry: &LedgerEntry) -> Result<Digest, CoreError> {
    let bytes = canonical_entry_bytes(entry)?;
    Ok(Digest::derive(crate::domain::ENTRY, &bytes))
}

fn entry_to_cbor_value(entry: &LedgerEntry) -> Value {
    let mut entries = Vec::with_capacity(9);

    entries.push((
        Value::Integer(keys::SEQUENCE_NUMBER.into()),
        Value::Integer(entry.sequence_number.into()),
    ));
    entries.push((
        Value::Integer(keys::EVENT_KIND.into()),
        Value::Text(entry.event_kind.as_str().to_string()),
    ));
    entries.push((
        Value::Integer(keys::SUBJECT_DIGEST.into()),
        Value::Bytes(entry.subject_digest.0.to_vec()),
    ));
    entries.push((
        Value::Integer(keys::ACTOR_IDENTITY.into()),
        Value::Text(entry.actor_identity.clone()),
    ));
    entries.push((
        Value::Integer(keys::PURPOSE.into()),
        Value::Text(entry.purpose.clone()),
    ));
    entries.push((
        Value::Integer(keys::OCCURRED_AT.into()),
        Value::Text(time::format(&entry.occurred_at)),
    ));
    entries.push((
        Value::Integer(keys::RECORDED_AT.into()),
        Value::Text(time::format(&entry.recorded_at)),
    ));
    entries.push((
        Value::Integer(keys::PRIOR_ENTRY_HASH.into()),
        Value::Bytes(entry.prior_entry_hash.0.to_vec()),
    ));

    // Absent detail is omitted, not encoded as null.
    if let Some(detail) = &entry.detail {
        entries.push((
            Value::Integer(keys::DETAIL.into()),
            Value::Text(detail.clone()),
        ));
    }

    Value::Map(entries)
}

/// Encode a CBOR value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr)?,
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::Encoding(
                "floats not supported in canonical encoding".into(),
            ))
        }
        _ => return Err(CoreError::Encoding("unsupported CBOR value type".into())),
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<(), CoreError> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison; duplicate keys are
/// rejected since they would make two distinct maps encode identically.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut key_value_pairs = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        key_value_pairs.push((key_buf, v));
    }

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if key_value_pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(CoreError::Encoding("duplicate map key".into()));
    }

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}
