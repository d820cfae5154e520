//! The event-sealing coordinator.
//!
//! Each group lives behind its own async mutex, so edits to different groups
//! never contend. Sealing additionally takes the sealed-member index for the
//! duration of the conflict check and registration.
//!
//! Group state is written through to the store on every change and loaded
//! back before the first operation, so a sealed group stays sealed across a
//! restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use custody_core::{
    find_conflicts, time, Accessor, Digest, EntryDraft, EventKind, GroupId, GroupRecord,
    GroupState, OffsetMetadata, SealedGroup, UnsealedGroup,
};
use custody_store::{EntryFilter, GroupStore, LedgerStore, ObjectIndex, StoreError};
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info, warn};

use crate::error::{CustodyError, Result};
use crate::ledger::Ledger;

type Slot = Arc<Mutex<GroupState>>;

/// Creates, edits and seals groups of evidence.
pub struct Coordinator<S> {
    index: Arc<S>,
    ledger: Arc<Ledger<S>>,
    groups: RwLock<HashMap<GroupId, Slot>>,
    /// Sealed groups, checked for offset conflicts on every seal.
    sealed: RwLock<BTreeMap<GroupId, SealedGroup>>,
    restored: OnceCell<()>,
    offset_tolerance_ms: i64,
}

impl<S: LedgerStore + ObjectIndex + GroupStore + 'static> Coordinator<S> {
    pub fn new(index: Arc<S>, ledger: Arc<Ledger<S>>, offset_tolerance_ms: i64) -> Self {
        Self {
            index,
            ledger,
            groups: RwLock::new(HashMap::new()),
            sealed: RwLock::new(BTreeMap::new()),
            restored: OnceCell::new(),
            offset_tolerance_ms,
        }
    }

    /// Load stored groups once. A failed load is retried on the next call.
    async fn restore(&self) -> Result<()> {
        self.restored.get_or_try_init(|| self.load_stored()).await?;
        Ok(())
    }

    async fn load_stored(&self) -> Result<()> {
        let records = self.index.load_groups().await?;
        let mut states = Vec::with_capacity(records.len());
        for record in records {
            states.push(GroupState::restore(record)?);
        }

        let mut sealed_count = 0;
        {
            let mut groups = self.groups.write().map_err(StoreError::from)?;
            let mut sealed = self.sealed.write().map_err(StoreError::from)?;
            for state in &states {
                if let Some(frozen) = state.as_sealed() {
                    sealed.insert(frozen.group_id(), frozen.clone());
                    sealed_count += 1;
                }
            }
            for state in states.iter().cloned() {
                groups
                    .entry(state.group_id())
                    .or_insert_with(|| Arc::new(Mutex::new(state)));
            }
        }
        if !states.is_empty() {
            info!(groups = states.len(), sealed = sealed_count, "groups restored");
        }
        Ok(())
    }

    async fn slot(&self, group: GroupId) -> Result<Slot> {
        self.restore().await?;
        self.groups
            .read()
            .map_err(StoreError::from)?
            .get(&group)
            .cloned()
            .ok_or(CustodyError::GroupNotFound(group))
    }

    /// Create an empty, unsealed group identified by its label.
    pub async fn create_group(&self, label: &str, accessor: &Accessor) -> Result<GroupRecord> {
        if label.trim().is_empty() {
            return Err(CustodyError::InvalidRequest("group label must not be empty".into()));
        }
        self.restore().await?;
        let state = GroupState::Unsealed(UnsealedGroup::new(label, time::now()));
        let group_id = state.group_id();
        let record = state.record();

        {
            let mut groups = self.groups.write().map_err(StoreError::from)?;
            if groups.contains_key(&group_id) {
                return Err(CustodyError::GroupExists(group_id));
            }
            groups.insert(group_id, Arc::new(Mutex::new(state)));
        }

        // The stored row is the durable claim on the id.
        match self.index.insert_group(&record).await {
            Ok(true) => {}
            Ok(false) => {
                self.forget(group_id);
                return Err(CustodyError::GroupExists(group_id));
            }
            Err(e) => {
                self.forget(group_id);
                return Err(e.into());
            }
        }

        let draft = EntryDraft::new(EventKind::GroupCreated, group_id.as_subject(), accessor)
            .detail(format!("label={label}"));
        if let Err(e) = self.ledger.append_draft(draft).await {
            self.forget(group_id);
            if let Err(cleanup) = self.index.remove_group(&group_id).await {
                warn!(group = %group_id, error = %cleanup, "stored group left behind after failed create");
            }
            return Err(e);
        }
        info!(group = %group_id, label, "group created");
        Ok(record)
    }

    fn forget(&self, group: GroupId) {
        if let Ok(mut groups) = self.groups.write() {
            groups.remove(&group);
        }
    }

    /// Store `next` and then make it the live state.
    async fn commit(&self, state: &mut GroupState, next: GroupState) -> Result<()> {
        self.index.update_group(&next.record()).await?;
        *state = next;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a stored object to a group.
    pub async fn add_member(
        &self,
        group: GroupId,
        digest: Digest,
        offset: OffsetMetadata,
        accessor: &Accessor,
    ) -> Result<()> {
        let slot = self.slot(group).await?;
        let mut state = slot.lock().await;
        if state.is_sealed() {
            return self.deny(group, "add_member", digest, accessor).await;
        }
        if self.index.get_object(&digest).await?.is_none() {
            return Err(CustodyError::MissingContent(digest));
        }
        let mut next = state.clone();
        next.unsealed_mut()?.add_member(digest, offset)?;
        self.commit(&mut state, next).await
    }

    pub async fn remove_member(
        &self,
        group: GroupId,
        digest: Digest,
        accessor: &Accessor,
    ) -> Result<()> {
        let slot = self.slot(group).await?;
        let mut state = slot.lock().await;
        if state.is_sealed() {
            return self.deny(group, "remove_member", digest, accessor).await;
        }
        let mut next = state.clone();
        next.unsealed_mut()?.remove_member(&digest)?;
        self.commit(&mut state, next).await
    }

    /// Replace a member's offset, returning the previous one.
    pub async fn update_offset(
        &self,
        group: GroupId,
        digest: Digest,
        offset: OffsetMetadata,
        accessor: &Accessor,
    ) -> Result<OffsetMetadata> {
        let slot = self.slot(group).await?;
        let mut state = slot.lock().await;
        if state.is_sealed() {
            return self.deny(group, "update_offset", digest, accessor).await;
        }
        let mut next = state.clone();
        let previous = next.unsealed_mut()?.update_offset(&digest, offset)?;
        self.commit(&mut state, next).await?;
        Ok(previous)
    }

    /// Record a refused mutation and return `GroupSealed`.
    async fn deny<T>(
        &self,
        group: GroupId,
        operation: &str,
        member: Digest,
        accessor: &Accessor,
    ) -> Result<T> {
        let draft = EntryDraft::new(EventKind::MutationDenied, group.as_subject(), accessor)
            .detail(format!("operation={operation}; member={member}"));
        let entry = self.ledger.append_draft(draft).await?;
        warn!(group = %group, operation, seq = entry.sequence_number, "mutation of sealed group denied");
        Err(CustodyError::GroupSealed(group))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Freeze a group.
    ///
    /// Sealing an already sealed group returns its sealed state unchanged.
    /// Members that overlap another sealed group with a materially different
    /// offset fail the seal with [`CustodyError::SealConflict`]; the group
    /// stays unsealed and nothing is recorded.
    ///
    /// The sealed state is stored before the `GroupSealed` entry is appended.
    /// If that append fails the group stays sealed, and the next seal call
    /// appends the missing entry.
    pub async fn seal(&self, group: GroupId, sealed_by: &Accessor) -> Result<SealedGroup> {
        let slot = self.slot(group).await?;
        let mut state = slot.lock().await;

        let unsealed = match &*state {
            GroupState::Sealed(sealed) => {
                let sealed = sealed.clone();
                if !self.seal_recorded(group).await? {
                    warn!(group = %group, "sealed group has no seal entry, recording it");
                    self.record_seal(&sealed, sealed_by).await?;
                }
                return Ok(sealed);
            }
            GroupState::Unsealed(unsealed) => unsealed.clone(),
        };

        let sealed = unsealed.seal(sealed_by.actor_identity(), time::now());
        {
            let mut index = self.sealed.write().map_err(StoreError::from)?;
            let conflicts = find_conflicts(
                group,
                sealed.members(),
                index.values(),
                self.offset_tolerance_ms,
            );
            if !conflicts.is_empty() {
                warn!(group = %group, conflicts = conflicts.len(), "seal refused: offset conflict");
                return Err(CustodyError::SealConflict { group, conflicts });
            }
            index.insert(group, sealed.clone());
        }

        if let Err(e) = self.index.update_group(&sealed.record()).await {
            if let Ok(mut index) = self.sealed.write() {
                index.remove(&group);
            }
            return Err(e.into());
        }
        *state = GroupState::Sealed(sealed.clone());

        match self.record_seal(&sealed, sealed_by).await {
            Ok(seq) => {
                info!(
                    group = %group,
                    members = sealed.members().len(),
                    seq,
                    "group sealed"
                );
                Ok(sealed)
            }
            Err(e) => {
                error!(group = %group, error = %e, "group sealed but its seal entry was not recorded");
                Err(e)
            }
        }
    }

    async fn record_seal(&self, sealed: &SealedGroup, sealed_by: &Accessor) -> Result<u64> {
        let group = sealed.group_id();
        let draft = EntryDraft::new(EventKind::GroupSealed, group.as_subject(), sealed_by)
            .detail(format!("snapshot={}", sealed.snapshot_digest()));
        Ok(self.ledger.append_draft(draft).await?.sequence_number)
    }

    async fn seal_recorded(&self, group: GroupId) -> Result<bool> {
        let filter = EntryFilter::new()
            .subject(group.as_subject())
            .kind(EventKind::GroupSealed)
            .limit(1);
        Ok(!self.ledger.query(&filter).await?.is_empty())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn group(&self, group: GroupId) -> Result<GroupRecord> {
        let slot = self.slot(group).await?;
        let state = slot.lock().await;
        Ok(state.record())
    }

    /// All groups, ordered by id.
    pub async fn groups(&self) -> Result<Vec<GroupRecord>> {
        self.restore().await?;
        let slots: BTreeMap<GroupId, Slot> = self
            .groups
            .read()
            .map_err(StoreError::from)?
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots.values() {
            records.push(slot.lock().await.record());
        }
        Ok(records)
    }

    /// The sealed state of a group, for export.
    pub async fn sealed_group(&self, group: GroupId) -> Result<SealedGroup> {
        let slot = self.slot(group).await?;
        let state = slot.lock().await;
        state
            .as_sealed()
            .cloned()
            .ok_or(CustodyError::GroupNotSealed(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceStore, IngestRequest};
    use crate::retry::RetryConfig;
    use custody_store::{EntryFilter, MemoryBlobStore, MemoryStore};
    use std::io::Cursor;

    struct Harness {
        store: Arc<MemoryStore>,
        evidence: EvidenceStore<MemoryStore>,
        coordinator: Coordinator<MemoryStore>,
        ledger: Arc<Ledger<MemoryStore>>,
    }

    impl Harness {
        /// A fresh coordinator over the same store, as after a restart.
        fn restarted(&self, tolerance_ms: i64) -> Coordinator<MemoryStore> {
            Coordinator::new(self.store.clone(), self.ledger.clone(), tolerance_ms)
        }
    }

    fn harness(tolerance_ms: i64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), RetryConfig::none(), 5_000, 16));
        let evidence = EvidenceStore::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            ledger.clone(),
            1024,
            RetryConfig::none(),
        );
        let coordinator = Coordinator::new(store.clone(), ledger.clone(), tolerance_ms);
        Harness {
            store,
            evidence,
            coordinator,
            ledger,
        }
    }

    fn accessor() -> Accessor {
        Accessor::new("bob", "case-prep").unwrap()
    }

    async fn stored(h: &Harness, bytes: &'static [u8]) -> Digest {
        h.evidence
            .put(Cursor::new(bytes), IngestRequest::new("text/plain", accessor()))
            .await
            .unwrap()
            .object
            .digest
    }

    #[tokio::test]
    async fn test_create_group_emits_entry() {
        let h = harness(0);
        let record = h.coordinator.create_group("g1", &accessor()).await.unwrap();
        assert_eq!(record.group_id, GroupId::derive("g1"));
        assert!(!record.is_sealed);

        let head = h.ledger.head().await.unwrap().unwrap();
        assert_eq!(head.event_kind, EventKind::GroupCreated);
        assert_eq!(head.subject_digest, record.group_id.as_subject());

        assert!(matches!(
            h.coordinator.create_group("g1", &accessor()).await,
            Err(CustodyError::GroupExists(_))
        ));
    }

    #[tokio::test]
    async fn test_add_member_requires_stored_object() {
        let h = harness(0);
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        let missing = Digest::hash(b"not stored");
        assert!(matches!(
            h.coordinator
                .add_member(g, missing, OffsetMetadata::new(0), &accessor())
                .await,
            Err(CustodyError::MissingContent(_))
        ));
    }

    #[tokio::test]
    async fn test_sealed_group_denies_every_mutation() {
        let h = harness(0);
        let d = stored(&h, b"evidence-1").await;
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g, d, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap();
        let sealed = h.coordinator.seal(g, &accessor()).await.unwrap();
        let before = h.ledger.count().await.unwrap();

        let other = stored(&h, b"evidence-2").await;
        let err = h
            .coordinator
            .add_member(g, other, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::GroupSealed(id) if id == g));
        assert!(matches!(
            h.coordinator.remove_member(g, d, &accessor()).await,
            Err(CustodyError::GroupSealed(_))
        ));
        assert!(matches!(
            h.coordinator
                .update_offset(g, d, OffsetMetadata::new(10), &accessor())
                .await,
            Err(CustodyError::GroupSealed(_))
        ));

        // One ingest for `other`, then one denial per attempted mutation.
        let denied = h
            .ledger
            .query(&EntryFilter::new().kind(EventKind::MutationDenied))
            .await
            .unwrap();
        assert_eq!(denied.len(), 3);
        assert_eq!(h.ledger.count().await.unwrap(), before + 4);
        assert_eq!(
            denied[0].detail.as_deref(),
            Some(format!("operation=add_member; member={other}").as_str())
        );

        // The sealed state is unchanged.
        assert_eq!(h.coordinator.sealed_group(g).await.unwrap(), sealed);
    }

    #[tokio::test]
    async fn test_reseal_is_idempotent() {
        let h = harness(0);
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        let first = h.coordinator.seal(g, &accessor()).await.unwrap();
        let count = h.ledger.count().await.unwrap();

        let second = h.coordinator.seal(g, &accessor()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.ledger.count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_seal_records_snapshot() {
        let h = harness(0);
        let d = stored(&h, b"clip").await;
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g, d, OffsetMetadata::new(1500).with_label("cam-1"), &accessor())
            .await
            .unwrap();
        let sealed = h.coordinator.seal(g, &accessor()).await.unwrap();

        let head = h.ledger.head().await.unwrap().unwrap();
        assert_eq!(head.event_kind, EventKind::GroupSealed);
        assert_eq!(
            head.detail,
            Some(format!("snapshot={}", sealed.snapshot_digest()))
        );
        assert!(h.coordinator.group(g).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_conflicting_offsets_block_seal() {
        let h = harness(100);
        let d = stored(&h, b"shared clip").await;

        let g1 = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g1, d, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap();
        h.coordinator.seal(g1, &accessor()).await.unwrap();

        let g2 = h.coordinator.create_group("g2", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g2, d, OffsetMetadata::new(5_000), &accessor())
            .await
            .unwrap();
        let count = h.ledger.count().await.unwrap();

        match h.coordinator.seal(g2, &accessor()).await {
            Err(CustodyError::SealConflict { group, conflicts }) => {
                assert_eq!(group, g2);
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].other_group, g1);
            }
            other => panic!("expected seal conflict, got {other:?}"),
        }
        assert_eq!(h.ledger.count().await.unwrap(), count);
        assert!(!h.coordinator.group(g2).await.unwrap().is_sealed);

        // Within tolerance the seal goes through.
        h.coordinator
            .update_offset(g2, d, OffsetMetadata::new(50), &accessor())
            .await
            .unwrap();
        assert!(h.coordinator.seal(g2, &accessor()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let h = harness(0);
        let g = GroupId::derive("nope");
        assert!(matches!(
            h.coordinator.seal(g, &accessor()).await,
            Err(CustodyError::GroupNotFound(_))
        ));
        assert!(matches!(
            h.coordinator.sealed_group(g).await,
            Err(CustodyError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_groups_sorted_by_id() {
        let h = harness(0);
        for label in ["c", "a", "b"] {
            h.coordinator.create_group(label, &accessor()).await.unwrap();
        }
        let ids: Vec<GroupId> = h
            .coordinator
            .groups()
            .await
            .unwrap()
            .iter()
            .map(|r| r.group_id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_groups_are_written_through() {
        let h = harness(0);
        let d = stored(&h, b"evidence-1").await;
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g, d, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap();
        h.coordinator
            .update_offset(g, d, OffsetMetadata::new(75), &accessor())
            .await
            .unwrap();
        assert_eq!(
            h.store.load_groups().await.unwrap(),
            vec![h.coordinator.group(g).await.unwrap()]
        );

        let sealed = h.coordinator.seal(g, &accessor()).await.unwrap();
        assert_eq!(h.store.load_groups().await.unwrap(), vec![sealed.record()]);
    }

    #[tokio::test]
    async fn test_sealed_group_survives_restart() {
        let h = harness(100);
        let d = stored(&h, b"shared clip").await;
        let g1 = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g1, d, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap();
        let sealed = h.coordinator.seal(g1, &accessor()).await.unwrap();
        let g2 = h.coordinator.create_group("g2", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g2, d, OffsetMetadata::new(5_000), &accessor())
            .await
            .unwrap();

        let restarted = h.restarted(100);
        assert_eq!(restarted.sealed_group(g1).await.unwrap(), sealed);
        assert!(!restarted.group(g2).await.unwrap().is_sealed);
        assert_eq!(restarted.groups().await.unwrap().len(), 2);

        // The label cannot be claimed again.
        assert!(matches!(
            restarted.create_group("g1", &accessor()).await,
            Err(CustodyError::GroupExists(id)) if id == g1
        ));
        assert!(matches!(
            restarted
                .add_member(g1, d, OffsetMetadata::new(0), &accessor())
                .await,
            Err(CustodyError::GroupSealed(_))
        ));

        // Re-sealing changes nothing; the restored seal still blocks conflicts.
        let count = h.ledger.count().await.unwrap();
        assert_eq!(restarted.seal(g1, &accessor()).await.unwrap(), sealed);
        assert_eq!(h.ledger.count().await.unwrap(), count);
        assert!(matches!(
            restarted.seal(g2, &accessor()).await,
            Err(CustodyError::SealConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_edited_stored_seal_fails_restore() {
        let h = harness(0);
        let d = stored(&h, b"evidence-1").await;
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;
        h.coordinator
            .add_member(g, d, OffsetMetadata::new(0), &accessor())
            .await
            .unwrap();
        h.coordinator.seal(g, &accessor()).await.unwrap();

        // A second store holding an edited copy of the sealed record.
        let mut edited = h.coordinator.group(g).await.unwrap();
        edited.member_refs[0].offset.offset_ms = 900;
        let forged = MemoryStore::new();
        forged.insert_group(&edited).await.unwrap();
        let restarted = Coordinator::new(Arc::new(forged), h.ledger.clone(), 0);

        let err = restarted.sealed_group(g).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_missing_seal_entry_is_recorded_on_reseal() {
        let h = harness(0);
        let g = h.coordinator.create_group("g1", &accessor()).await.unwrap().group_id;

        // Sealed in storage, as if the seal entry append had failed.
        let mut state = GroupState::restore(h.coordinator.group(g).await.unwrap()).unwrap();
        state.seal("bob", time::now());
        h.store.update_group(&state.record()).await.unwrap();
        let restarted = h.restarted(0);
        let count = h.ledger.count().await.unwrap();

        let sealed = restarted.seal(g, &accessor()).await.unwrap();
        assert_eq!(Some(sealed), state.as_sealed().cloned());
        assert_eq!(h.ledger.count().await.unwrap(), count + 1);
        let head = h.ledger.head().await.unwrap().unwrap();
        assert_eq!(head.event_kind, EventKind::GroupSealed);

        restarted.seal(g, &accessor()).await.unwrap();
        assert_eq!(h.ledger.count().await.unwrap(), count + 1);
    }
}
