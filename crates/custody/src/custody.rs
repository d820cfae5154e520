//! The `Custody` bundle: one ledger, one evidence store, one coordinator and
//! one exporter over shared storage.

use std::sync::Arc;

use custody_core::Package;
use custody_store::{
    BlobStore, FsBlobStore, GroupStore, LedgerStore, MemoryBlobStore, MemoryStore, ObjectIndex,
    SqliteStore, StoreError,
};
use tracing::info;

use crate::config::CustodyConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::evidence::EvidenceStore;
use crate::export::{ExportRequest, Exporter};
use crate::ledger::Ledger;

/// The custody subsystem.
pub struct Custody<S> {
    config: CustodyConfig,
    store: Arc<S>,
    ledger: Arc<Ledger<S>>,
    evidence: Arc<EvidenceStore<S>>,
    coordinator: Arc<Coordinator<S>>,
    exporter: Exporter<S>,
}

impl Custody<SqliteStore> {
    /// Open persistent custody under `config.root`: SQLite at
    /// `ledger.db` and blobs under `objects/`.
    pub fn open(config: CustodyConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root).map_err(StoreError::from)?;
        let store = SqliteStore::open(config.ledger_path())?;
        let blobs = FsBlobStore::open(&config.root)?;
        info!(root = %config.root.display(), "custody opened");
        Ok(Self::with_parts(config, store, Arc::new(blobs)))
    }
}

impl Custody<MemoryStore> {
    /// Custody with nothing persisted.
    pub fn in_memory(config: CustodyConfig) -> Self {
        Self::with_parts(config, MemoryStore::new(), Arc::new(MemoryBlobStore::new()))
    }
}

impl<S: LedgerStore + ObjectIndex + GroupStore + 'static> Custody<S> {
    /// Assemble from an arbitrary ledger/index backend and blob store.
    pub fn with_parts(config: CustodyConfig, store: S, blobs: Arc<dyn BlobStore>) -> Self {
        let store = Arc::new(store);
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            config.retry.clone(),
            config.backfill_tolerance_ms,
            config.feed_capacity,
        ));
        let evidence = Arc::new(EvidenceStore::new(
            store.clone(),
            blobs,
            ledger.clone(),
            config.block_size,
            config.retry.clone(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            ledger.clone(),
            config.offset_tolerance_ms,
        ));
        let exporter = Exporter::new(ledger.clone(), evidence.clone(), coordinator.clone());
        Self {
            config,
            store,
            ledger,
            evidence,
            coordinator,
            exporter,
        }
    }

    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    pub fn evidence(&self) -> &Arc<EvidenceStore<S>> {
        &self.evidence
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<S>> {
        &self.coordinator
    }

    pub fn exporter(&self) -> &Exporter<S> {
        &self.exporter
    }

    /// Shorthand for `exporter().export(request)`.
    pub async fn export(&self, request: ExportRequest) -> Result<Package> {
        self.exporter.export(request).await
    }
}
