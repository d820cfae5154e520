//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use custody::{Custody, CustodyConfig, IngestRequest, RetryConfig};
use custody_core::{Accessor, Digest, Timestamp};
use custody_store::{MemoryStore, SqliteStore};
use tempfile::TempDir;

/// 2026-01-14T12:00:00Z, the `generated_at` used across tests.
pub const FIXED_EPOCH_SECS: i64 = 1_768_392_000;

/// A persistent custody instance in a temp directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TestFixture {
    pub custody: Custody<SqliteStore>,
    dir: TempDir,
}

impl TestFixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let custody = Custody::open(config(dir.path()))?;
        Ok(Self { custody, dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.custody.config().ledger_path()
    }

    /// A second instance over the same directory, as another process would
    /// see it.
    pub fn reopen(&self) -> anyhow::Result<Custody<SqliteStore>> {
        Ok(Custody::open(config(self.dir.path()))?)
    }

    /// Ingest bytes as `text/plain` and return their digest.
    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> anyhow::Result<Digest> {
        let request = IngestRequest::new("text/plain", clerk()).filename(filename);
        let outcome = self
            .custody
            .evidence()
            .put(Cursor::new(bytes.to_vec()), request)
            .await?;
        Ok(outcome.object.digest)
    }
}

/// Defaults with no retry delay, rooted at `root`.
pub fn config(root: &Path) -> CustodyConfig {
    CustodyConfig::new(root).with_retry(RetryConfig::none())
}

/// An in-memory custody instance with test defaults.
pub fn memory_custody() -> Custody<MemoryStore> {
    Custody::in_memory(CustodyConfig::default().with_retry(RetryConfig::none()))
}

/// The intake clerk used by ingest helpers.
pub fn clerk() -> Accessor {
    accessor("clerk-7", "intake")
}

/// An examiner reading evidence for review.
pub fn examiner() -> Accessor {
    accessor("examiner", "case-review")
}

pub fn accessor(actor: &str, purpose: &str) -> Accessor {
    Accessor::new(actor, purpose).expect("test accessors have non-empty fields")
}

/// The fixed timestamp used as `generated_at` in tests.
pub fn fixed_time() -> Timestamp {
    DateTime::<Utc>::from_timestamp(FIXED_EPOCH_SECS, 0).expect("fixed epoch is in range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_core::time;

    #[test]
    fn test_fixed_time() {
        assert_eq!(time::format(&fixed_time()), "2026-01-14T12:00:00.000000Z");
    }

    #[tokio::test]
    async fn test_fixture_ingest() {
        let fixture = TestFixture::new().unwrap();
        let digest = fixture.ingest(b"evidence-1", "a.txt").await.unwrap();
        assert_eq!(digest, Digest::hash(b"evidence-1"));
        assert!(fixture.db_path().is_file());
    }

    #[tokio::test]
    async fn test_reopen_sees_same_ledger() {
        let fixture = TestFixture::new().unwrap();
        fixture.ingest(b"evidence-1", "a.txt").await.unwrap();
        let other = fixture.reopen().unwrap();
        assert_eq!(other.ledger().count().await.unwrap(), 1);
    }
}
