//! Configuration for a custody instance.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// File name of the SQLite ledger under [`CustodyConfig::root`].
pub const LEDGER_DB: &str = "ledger.db";

/// Configuration for [`Custody`](crate::Custody).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Directory holding `ledger.db` and `objects/`.
    pub root: PathBuf,
    /// Block size for streaming reads while hashing.
    pub block_size: usize,
    /// Retry policy for transient storage failures.
    pub retry: RetryConfig,
    /// How far `occurred_at` may trail `recorded_at` before the entry is
    /// considered backfilled. Also bounds how far into the future it may be.
    pub backfill_tolerance_ms: i64,
    /// Offsets closer than this are not a seal conflict.
    pub offset_tolerance_ms: i64,
    /// Buffer size of the ledger event feed.
    pub feed_capacity: usize,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("custody-data"),
            block_size: 64 * 1024,
            retry: RetryConfig::default(),
            backfill_tolerance_ms: 5_000,
            offset_tolerance_ms: 0,
            feed_capacity: 1024,
        }
    }
}

impl CustodyConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_backfill_tolerance_ms(mut self, tolerance_ms: i64) -> Self {
        self.backfill_tolerance_ms = tolerance_ms;
        self
    }

    pub fn with_offset_tolerance_ms(mut self, tolerance_ms: i64) -> Self {
        self.offset_tolerance_ms = tolerance_ms;
        self
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_DB)
    }
}
