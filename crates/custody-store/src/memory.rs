//! In-memory implementation of the ledger, object index and group store.
//!
//! Same semantics as SQLite, no persistence. Used by `Custody::in_memory` and
//! tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use custody_core::{ContentObject, Digest, GroupId, GroupRecord, LedgerEntry};

use crate::error::{Result, StoreError};
use crate::traits::{
    AppendResult, EntryFilter, GroupStore, InsertResult, LedgerStore, ObjectIndex,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Entry at index `i` has sequence number `i + 1`.
    entries: Vec<LedgerEntry>,

    objects: BTreeMap<Digest, ContentObject>,

    groups: BTreeMap<GroupId, GroupRecord>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendResult> {
        let mut inner = self.inner.write()?;
        let seq = entry.sequence_number;
        let len = inner.entries.len() as u64;

        if seq == 0 {
            return Err(StoreError::InvalidData("sequence numbers start at 1".into()));
        }
        if seq <= len {
            let existing = inner.entries[(seq - 1) as usize].this_entry_hash;
            return Ok(AppendResult::SequenceTaken { existing });
        }
        if seq != len + 1 {
            return Err(StoreError::InvalidData(format!(
                "append at seq {seq} would leave a gap after {len}"
            )));
        }

        inner.entries.push(entry.clone());
        Ok(AppendResult::Appended)
    }

    async fn head(&self) -> Result<Option<LedgerEntry>> {
        Ok(self.inner.read()?.entries.last().cloned())
    }

    async fn get_entry(&self, seq: u64) -> Result<Option<LedgerEntry>> {
        let inner = self.inner.read()?;
        Ok(seq
            .checked_sub(1)
            .and_then(|i| inner.entries.get(i as usize))
            .cloned())
    }

    async fn entries_range(&self, from: u64, to: u64) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read()?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.sequence_number >= from && e.sequence_number <= to)
            .cloned()
            .collect())
    }

    async fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read()?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.read()?.entries.len() as u64)
    }
}

#[async_trait]
impl ObjectIndex for MemoryStore {
    async fn insert_object(&self, object: &ContentObject) -> Result<InsertResult> {
        let mut inner = self.inner.write()?;
        if let Some(existing) = inner.objects.get(&object.digest) {
            return Ok(InsertResult::AlreadyExists(existing.clone()));
        }
        inner.objects.insert(object.digest, object.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_object(&self, digest: &Digest) -> Result<Option<ContentObject>> {
        Ok(self.inner.read()?.objects.get(digest).cloned())
    }

    async fn list_objects(&self) -> Result<Vec<ContentObject>> {
        Ok(self.inner.read()?.objects.values().cloned().collect())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn insert_group(&self, record: &GroupRecord) -> Result<bool> {
        let mut inner = self.inner.write()?;
        if inner.groups.contains_key(&record.group_id) {
            return Ok(false);
        }
        inner.groups.insert(record.group_id, record.clone());
        Ok(true)
    }

    async fn update_group(&self, record: &GroupRecord) -> Result<()> {
        let mut inner = self.inner.write()?;
        match inner.groups.get_mut(&record.group_id) {
            Some(stored) if stored.is_sealed => Err(StoreError::GroupFrozen(record.group_id)),
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(StoreError::InvalidData(format!(
                "group {} is not stored",
                record.group_id
            ))),
        }
    }

    async fn remove_group(&self, group: &GroupId) -> Result<()> {
        let mut inner = self.inner.write()?;
        if inner.groups.get(group).is_some_and(|g| g.is_sealed) {
            return Err(StoreError::GroupFrozen(*group));
        }
        inner.groups.remove(group);
        Ok(())
    }

    async fn load_groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.inner.read()?.groups.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LedgerStoreExt;
    use custody_core::{
        time, Accessor, EntryDraft, EventKind, GroupState, ObjectRole, OffsetMetadata,
        UnsealedGroup,
    };

    fn entry(seq: u64, prior: Digest) -> LedgerEntry {
        let accessor = Accessor::new("alice", "intake").unwrap();
        EntryDraft::new(EventKind::Ingest, Digest::hash(b"evidence-1"), &accessor)
            .finalize(seq, prior, time::parse("2026-01-14T12:00:00Z").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert_eq!(store.append_position().await.unwrap(), (1, Digest::GENESIS));

        let first = entry(1, Digest::GENESIS);
        assert_eq!(store.append_entry(&first).await.unwrap(), AppendResult::Appended);
        assert_eq!(
            store.append_position().await.unwrap(),
            (2, first.this_entry_hash)
        );
        assert_eq!(store.get_entry(1).await.unwrap(), Some(first.clone()));
        assert_eq!(store.get_entry(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_sequence_guard() {
        let store = MemoryStore::new();
        let first = entry(1, Digest::GENESIS);
        store.append_entry(&first).await.unwrap();

        let rival = entry(1, Digest::GENESIS);
        assert_eq!(
            store.append_entry(&rival).await.unwrap(),
            AppendResult::SequenceTaken {
                existing: first.this_entry_hash
            }
        );
        assert!(matches!(
            store.append_entry(&entry(5, first.this_entry_hash)).await,
            Err(StoreError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_object_index_idempotent() {
        let store = MemoryStore::new();
        let object = ContentObject {
            digest: Digest::hash(b"evidence-1"),
            byte_length: 10,
            declared_media_type: "text/plain".into(),
            first_seen_at: time::now(),
            storage_location: "mem".into(),
            role: ObjectRole::Original,
        };
        assert_eq!(store.insert_object(&object).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_object(&object).await.unwrap(),
            InsertResult::AlreadyExists(object.clone())
        );
        assert_eq!(store.list_objects().await.unwrap(), vec![object]);
    }

    #[tokio::test]
    async fn test_memory_sealed_group_is_frozen() {
        let store = MemoryStore::new();
        let mut state = GroupState::Unsealed(UnsealedGroup::new("g1", time::now()));
        assert!(store.insert_group(&state.record()).await.unwrap());
        assert!(!store.insert_group(&state.record()).await.unwrap());

        state
            .unsealed_mut()
            .unwrap()
            .add_member(Digest::hash(b"evidence-1"), OffsetMetadata::new(0))
            .unwrap();
        store.update_group(&state.record()).await.unwrap();
        state.seal("alice", time::now());
        store.update_group(&state.record()).await.unwrap();
        assert_eq!(store.load_groups().await.unwrap(), vec![state.record()]);

        let g1 = state.group_id();
        assert!(matches!(
            store.update_group(&state.record()).await,
            Err(StoreError::GroupFrozen(id)) if id == g1
        ));
        assert!(matches!(
            store.remove_group(&g1).await,
            Err(StoreError::GroupFrozen(_))
        ));
        assert_eq!(store.load_groups().await.unwrap(), vec![state.record()]);
    }
}
