//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use custody::core::{Accessor, Digest, Timestamp};
use custody::store::{MemoryStore, SqliteStore};
use custody::{Custody, CustodyConfig, IngestRequest, RetryConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn clerk() -> Accessor {
    Accessor::new("clerk-7", "intake").unwrap()
}

pub fn examiner() -> Accessor {
    Accessor::new("examiner", "case-review").unwrap()
}

/// 2026-01-14T12:00:00Z
pub fn t() -> Timestamp {
    DateTime::<Utc>::from_timestamp(1_768_392_000, 0).unwrap()
}

pub fn config(root: &Path) -> CustodyConfig {
    CustodyConfig::new(root).with_retry(RetryConfig::none())
}

pub fn open(root: &Path) -> Custody<SqliteStore> {
    Custody::open(config(root)).unwrap()
}

pub fn memory() -> Custody<MemoryStore> {
    Custody::in_memory(CustodyConfig::default().with_retry(RetryConfig::none()))
}

pub async fn ingest<S>(custody: &Custody<S>, bytes: &[u8], filename: &str) -> Digest
where
    S: custody::store::LedgerStore
        + custody::store::ObjectIndex
        + custody::store::GroupStore
        + 'static,
{
    custody
        .evidence()
        .put(
            Cursor::new(bytes.to_vec()),
            IngestRequest::new("text/plain", clerk()).filename(filename),
        )
        .await
        .unwrap()
        .object
        .digest
}
