//! The hash-chained audit ledger.
//!
//! Appends go through a single async mutex that owns the append cursor
//! (`next sequence number`, `prior hash`). The store's unique sequence
//! constraint backs it up: if another process took the position, the cursor
//! reloads from the store and the append is retried at the new head.

use std::sync::Arc;

use custody_core::{
    time, Accessor, ChainFault, ChainReport, ChainVerifier, Digest, EntryDraft, EventKind,
    LedgerEntry, Timestamp,
};
use custody_store::{AppendResult, EntryFilter, LedgerStore, LedgerStoreExt, StoreError};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, warn};

use crate::error::{CustodyError, Result};
use crate::retry::RetryConfig;

/// Entries fetched per page during verification and scans.
const PAGE_SIZE: u64 = 512;

/// Times an append re-reads the head after losing its position.
const MAX_POSITION_RETRIES: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_seq: u64,
    prior: Digest,
}

/// The append-only audit ledger.
pub struct Ledger<S> {
    store: Arc<S>,
    cursor: Mutex<Option<Cursor>>,
    feed: broadcast::Sender<LedgerEntry>,
    retry: RetryConfig,
    backfill_tolerance_ms: i64,
}

impl<S: LedgerStore + 'static> Ledger<S> {
    pub fn new(
        store: Arc<S>,
        retry: RetryConfig,
        backfill_tolerance_ms: i64,
        feed_capacity: usize,
    ) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            store,
            cursor: Mutex::new(None),
            feed,
            retry,
            backfill_tolerance_ms,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an entry that occurred now.
    pub async fn append(
        &self,
        kind: EventKind,
        subject: Digest,
        accessor: &Accessor,
    ) -> Result<LedgerEntry> {
        self.append_draft(EntryDraft::new(kind, subject, accessor)).await
    }

    /// Append a prepared draft.
    ///
    /// A draft may carry an explicit `occurred_at` for replayed events. It
    /// may lie in the past (logged as backfilled) but not in the future
    /// beyond the backfill tolerance.
    pub async fn append_draft(&self, draft: EntryDraft) -> Result<LedgerEntry> {
        if let Some(occurred_at) = draft.explicit_occurred_at() {
            let ahead = (occurred_at - time::now()).num_milliseconds();
            if ahead > self.backfill_tolerance_ms {
                return Err(CustodyError::InvalidRequest(format!(
                    "occurred_at {} is {ahead}ms in the future",
                    time::format(&occurred_at)
                )));
            }
        }

        let mut cursor = self.cursor.lock().await;
        let mut lost = 0;
        loop {
            let position = match *cursor {
                Some(position) => position,
                None => self.load_cursor().await?,
            };

            let entry = draft
                .clone()
                .finalize(position.next_seq, position.prior, time::now())?;

            let store = &self.store;
            let candidate = &entry;
            let outcome = self
                .retry
                .execute("append_entry", move || store.append_entry(candidate))
                .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The write may or may not have landed; re-read next time.
                    *cursor = None;
                    return Err(e.into());
                }
            };

            match outcome {
                AppendResult::Appended => {}
                AppendResult::SequenceTaken { existing } if existing == entry.this_entry_hash => {
                    // A retried write that had already committed.
                }
                AppendResult::SequenceTaken { existing } => {
                    lost += 1;
                    warn!(
                        seq = entry.sequence_number,
                        %existing,
                        "sequence position taken by another writer, reloading cursor"
                    );
                    *cursor = None;
                    if lost >= MAX_POSITION_RETRIES {
                        return Err(CustodyError::InvalidRequest(format!(
                            "could not claim a ledger position after {lost} attempts"
                        )));
                    }
                    continue;
                }
            }

            *cursor = Some(Cursor {
                next_seq: entry.sequence_number + 1,
                prior: entry.this_entry_hash,
            });

            if entry.is_backfilled(self.backfill_tolerance_ms) {
                warn!(
                    seq = entry.sequence_number,
                    kind = %entry.event_kind,
                    lag_ms = entry.backfill_lag_ms(),
                    "backfilled ledger entry"
                );
            }
            debug!(
                seq = entry.sequence_number,
                kind = %entry.event_kind,
                subject = %entry.subject_digest,
                "ledger entry appended"
            );

            // No subscribers is fine.
            let _ = self.feed.send(entry.clone());
            return Ok(entry);
        }
    }

    async fn load_cursor(&self) -> Result<Cursor> {
        let store = &self.store;
        let (next_seq, prior) = self
            .retry
            .execute("append_position", move || store.append_position())
            .await?;
        Ok(Cursor { next_seq, prior })
    }

    /// Receive every entry committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEntry> {
        self.feed.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify the chain over `from..=to` in one linear pass.
    ///
    /// Reading always starts at genesis, because the range is only as
    /// trustworthy as its anchor; a break before `from` is reported too.
    /// The head is snapshotted first, so appends that land while the pass
    /// runs are not examined.
    pub async fn verify_chain(&self, from: u64, to: u64) -> Result<ChainReport> {
        let head = self.head_seq().await?;
        if from == 0 || from > to {
            return Err(CustodyError::InvalidRange { from, to, head });
        }
        let end = to.min(head);
        if end == 0 {
            return Ok(ChainReport::empty());
        }

        let mut verifier = ChainVerifier::new();
        let mut lo = 1;
        while lo <= end && !verifier.is_broken() {
            let hi = end.min(lo + PAGE_SIZE - 1);
            match self.page(lo, hi).await {
                Ok(page) => push_all(&mut verifier, &page)?,
                Err(StoreError::Corrupt { seq, reason }) if (lo..=hi).contains(&seq) => {
                    // Rows are read in order, so everything before `seq` decodes.
                    if seq > lo {
                        push_all(&mut verifier, &self.page(lo, seq - 1).await?)?;
                    }
                    warn!(seq, %reason, "ledger row does not decode");
                    verifier.undecodable(seq, reason);
                }
                Err(e) => return Err(e.into()),
            }
            lo = hi + 1;
        }

        let missing_tail = !verifier.is_broken() && verifier.next_seq() <= end;
        let next = verifier.next_seq();
        let mut report = verifier.finish();
        if missing_tail {
            report = ChainReport {
                valid: false,
                break_at: Some(next),
                checked: report.checked,
                fault: Some(ChainFault::SequenceGap {
                    expected: next,
                    found: end + 1,
                }),
            };
        }

        if let (false, Some(at)) = (report.valid, report.break_at) {
            error!(break_at = at, fault = ?report.fault, "ledger chain break detected");
        } else {
            debug!(checked = report.checked, "ledger chain verified");
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Entries with `from <= seq <= to`, in sequence order.
    ///
    /// A stored row that no longer decodes fails with
    /// [`CustodyError::ChainBreak`] at its sequence number.
    pub async fn entries(&self, from: u64, to: u64) -> Result<Vec<LedgerEntry>> {
        Ok(self.page(from, to).await?)
    }

    async fn page(&self, from: u64, to: u64) -> std::result::Result<Vec<LedgerEntry>, StoreError> {
        let store = &self.store;
        self.retry
            .execute("entries_range", move || store.entries_range(from, to))
            .await
    }

    /// Entries matching a filter. Filtering never affects verification.
    pub async fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let store = &self.store;
        Ok(self
            .retry
            .execute("query", move || store.query(filter))
            .await?)
    }

    pub async fn head(&self) -> Result<Option<LedgerEntry>> {
        let store = &self.store;
        Ok(self.retry.execute("head", move || store.head()).await?)
    }

    /// Sequence number of the head, 0 for an empty ledger.
    pub async fn head_seq(&self) -> Result<u64> {
        let store = &self.store;
        match self.retry.execute("head", move || store.head()).await {
            Ok(head) => Ok(head.map_or(0, |e| e.sequence_number)),
            // The row is there even if it no longer decodes.
            Err(StoreError::Corrupt { seq, .. }) => Ok(seq),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, seq: u64) -> Result<Option<LedgerEntry>> {
        let store = &self.store;
        Ok(self
            .retry
            .execute("get_entry", move || store.get_entry(seq))
            .await?)
    }

    pub async fn count(&self) -> Result<u64> {
        let store = &self.store;
        Ok(self.retry.execute("count", move || store.count()).await?)
    }

    /// Entries whose `occurred_at` trails `recorded_at` by more than
    /// `tolerance_ms`.
    pub async fn backfilled(&self, tolerance_ms: i64) -> Result<Vec<LedgerEntry>> {
        let head = self.head_seq().await?;
        let mut found = Vec::new();
        let mut lo = 1;
        while lo <= head {
            let hi = head.min(lo + PAGE_SIZE - 1);
            found.extend(
                self.entries(lo, hi)
                    .await?
                    .into_iter()
                    .filter(|e| e.is_backfilled(tolerance_ms)),
            );
            lo = hi + 1;
        }
        Ok(found)
    }

    /// Entries about one subject within an `occurred_at` window.
    pub async fn history(
        &self,
        subject: Digest,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut filter = EntryFilter::new().subject(subject);
        filter.since = since;
        filter.until = until;
        self.query(&filter).await
    }
}

fn push_all(verifier: &mut ChainVerifier, entries: &[LedgerEntry]) -> Result<()> {
    for entry in entries {
        verifier.push(entry)?;
        if verifier.is_broken() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_store::MemoryStore;

    fn accessor() -> Accessor {
        Accessor::new("alice", "case-review").unwrap()
    }

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::new(Arc::new(MemoryStore::new()), RetryConfig::none(), 5_000, 16)
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let ledger = ledger();
        let d = Digest::hash(b"evidence-1");

        let first = ledger.append(EventKind::Ingest, d, &accessor()).await.unwrap();
        let second = ledger.append(EventKind::Accessed, d, &accessor()).await.unwrap();

        assert_eq!(first.sequence_number, 1);
        assert!(first.is_genesis());
        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.prior_entry_hash, first.this_entry_hash);
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_verify_chain_valid() {
        let ledger = ledger();
        for i in 0..5u8 {
            ledger
                .append(EventKind::Ingest, Digest::hash(&[i]), &accessor())
                .await
                .unwrap();
        }
        let report = ledger.verify_chain(1, 5).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.checked, 5);

        // Past the head is clamped to the head.
        assert!(ledger.verify_chain(2, 100).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_verify_chain_rejects_bad_range() {
        let ledger = ledger();
        assert!(matches!(
            ledger.verify_chain(0, 3).await,
            Err(CustodyError::InvalidRange { .. })
        ));
        assert!(matches!(
            ledger.verify_chain(4, 3).await,
            Err(CustodyError::InvalidRange { .. })
        ));
        assert!(ledger.verify_chain(1, 1).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_cursor_reloads_after_foreign_append() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), RetryConfig::none(), 5_000, 16);
        let first = ledger
            .append(EventKind::Ingest, Digest::hash(b"a"), &accessor())
            .await
            .unwrap();

        // Another writer appends directly to the store.
        let foreign = EntryDraft::new(EventKind::Accessed, Digest::hash(b"a"), &accessor())
            .finalize(2, first.this_entry_hash, time::now())
            .unwrap();
        assert_eq!(store.append_entry(&foreign).await.unwrap(), AppendResult::Appended);

        let third = ledger
            .append(EventKind::Downloaded, Digest::hash(b"a"), &accessor())
            .await
            .unwrap();
        assert_eq!(third.sequence_number, 3);
        assert_eq!(third.prior_entry_hash, foreign.this_entry_hash);
        assert!(ledger.verify_chain(1, 3).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let ledger = Arc::new(ledger());
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(EventKind::Accessed, Digest::hash(&[i]), &accessor())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = ledger.entries(1, 32).await.unwrap();
        let seqs: Vec<u64> = entries.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, (1..=32).collect::<Vec<_>>());
        assert!(ledger.verify_chain(1, 32).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_feed_publishes_committed_entries() {
        let ledger = ledger();
        let mut rx = ledger.subscribe();
        let entry = ledger
            .append(EventKind::Ingest, Digest::hash(b"x"), &accessor())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_backfilled_entries() {
        let ledger = ledger();
        let past = time::now() - chrono::Duration::hours(2);
        let draft = EntryDraft::new(EventKind::Accessed, Digest::hash(b"x"), &accessor())
            .occurred_at(past);
        let replayed = ledger.append_draft(draft).await.unwrap();
        ledger
            .append(EventKind::Accessed, Digest::hash(b"y"), &accessor())
            .await
            .unwrap();

        let backfilled = ledger.backfilled(5_000).await.unwrap();
        assert_eq!(backfilled, vec![replayed]);
    }

    #[tokio::test]
    async fn test_future_occurred_at_rejected() {
        let ledger = ledger();
        let future = time::now() + chrono::Duration::hours(1);
        let draft = EntryDraft::new(EventKind::Accessed, Digest::hash(b"x"), &accessor())
            .occurred_at(future);
        assert!(matches!(
            ledger.append_draft(draft).await,
            Err(CustodyError::InvalidRequest(_))
        ));
        assert_eq!(ledger.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_filters_by_subject() {
        let ledger = ledger();
        let a = Digest::hash(b"a");
        let b = Digest::hash(b"b");
        ledger.append(EventKind::Ingest, a, &accessor()).await.unwrap();
        ledger.append(EventKind::Ingest, b, &accessor()).await.unwrap();
        ledger.append(EventKind::Accessed, a, &accessor()).await.unwrap();

        let history = ledger.history(a, None, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.subject_digest == a));
    }
}
