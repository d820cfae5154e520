//! Deterministic export packages.
//!
//! An export is a pure function of its request and of the stored content
//! and ledger at generation time. `generated_at` is always supplied by the
//! caller. Every step fails closed: a package is either complete or not
//! produced at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use custody_core::package::{GROUPS_FILE, LEDGER_FILE, STATEMENT_FILE};
use custody_core::{
    manifest_id, object_path, render_statement, time, Accessor, ContentObject, Digest,
    EntryDraft, EventKind, ExportManifest, GroupId, GroupRecord, LedgerRange, Package,
    StatementInput, StatementObject, Timestamp,
};
use custody_store::{GroupStore, LedgerStore, ObjectIndex};
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::error::{CustodyError, Result};
use crate::evidence::EvidenceStore;
use crate::ledger::Ledger;

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub digests: Vec<Digest>,
    pub ledger_range: LedgerRange,
    /// Part of the manifest id. Never taken from the clock.
    pub generated_at: Timestamp,
    /// Sealed groups to bundle in `groups.json`.
    pub groups: Vec<GroupId>,
    pub include_statement: bool,
    /// Recorded on the `exported` entry.
    pub accessor: Accessor,
}

impl ExportRequest {
    pub fn new(
        digests: impl IntoIterator<Item = Digest>,
        ledger_range: LedgerRange,
        generated_at: Timestamp,
        accessor: Accessor,
    ) -> Self {
        Self {
            digests: digests.into_iter().collect(),
            ledger_range,
            generated_at,
            groups: Vec::new(),
            include_statement: true,
            accessor,
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    pub fn with_statement(mut self, include: bool) -> Self {
        self.include_statement = include;
        self
    }
}

/// Progress events emitted while an export runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportProgress {
    /// Inputs checked, chain verified.
    Validated {
        objects: usize,
        entries: u64,
        groups: usize,
    },
    /// One object read and re-verified.
    ObjectRead {
        digest: Digest,
        done: usize,
        total: usize,
    },
    /// All files and the manifest are built.
    Assembled { manifest_id: Digest, files: usize },
    /// The `exported` entry is committed.
    Completed {
        manifest_id: Digest,
        package_hash: Digest,
    },
}

/// Receives progress and is polled for cancellation between stages and
/// between objects.
pub trait ExportObserver: Send + Sync {
    fn on_progress(&self, _progress: &ExportProgress) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExportObserver for NoopObserver {}

/// Shared cancellation flag.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ExportObserver for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds export packages.
pub struct Exporter<S> {
    ledger: Arc<Ledger<S>>,
    evidence: Arc<EvidenceStore<S>>,
    coordinator: Arc<Coordinator<S>>,
}

impl<S: LedgerStore + ObjectIndex + GroupStore + 'static> Exporter<S> {
    pub fn new(
        ledger: Arc<Ledger<S>>,
        evidence: Arc<EvidenceStore<S>>,
        coordinator: Arc<Coordinator<S>>,
    ) -> Self {
        Self {
            ledger,
            evidence,
            coordinator,
        }
    }

    pub async fn export(&self, request: ExportRequest) -> Result<Package> {
        self.export_with(request, &NoopObserver).await
    }

    /// Export with progress reporting and cooperative cancellation.
    ///
    /// A cancelled export returns [`CustodyError::Cancelled`], records
    /// nothing, and yields no package.
    pub async fn export_with(
        &self,
        request: ExportRequest,
        observer: &dyn ExportObserver,
    ) -> Result<Package> {
        let generated_at = time::normalize(request.generated_at);
        let range = request.ledger_range;

        let mut digests = request.digests;
        digests.sort();
        digests.dedup();
        let mut group_ids = request.groups;
        group_ids.sort();
        group_ids.dedup();

        // 1. Every object must be stored.
        let mut objects: Vec<ContentObject> = Vec::with_capacity(digests.len());
        for digest in &digests {
            objects.push(self.evidence.require_object(digest).await?);
        }

        // 2. The range must exist and its chain must hold from genesis.
        let head = self.ledger.head_seq().await?;
        if range.from == 0 || range.from > range.to || range.to > head {
            return Err(CustodyError::InvalidRange {
                from: range.from,
                to: range.to,
                head,
            });
        }
        let report = self.ledger.verify_chain(1, range.to).await?;
        if let Some(at) = report.break_at {
            error!(break_at = at, "export refused: ledger chain broken");
            return Err(CustodyError::ChainBreak { at });
        }

        // 3. Every group must be sealed.
        let mut groups: Vec<GroupRecord> = Vec::with_capacity(group_ids.len());
        for id in &group_ids {
            groups.push(self.coordinator.sealed_group(*id).await?.record());
        }

        observer.on_progress(&ExportProgress::Validated {
            objects: objects.len(),
            entries: range.len(),
            groups: groups.len(),
        });
        cancelled(observer)?;

        // 4. Read and re-verify every object.
        let mut files: BTreeMap<String, Bytes> = BTreeMap::new();
        let total = digests.len();
        for (i, digest) in digests.iter().enumerate() {
            let bytes = self
                .evidence
                .read_verified(digest, &request.accessor)
                .await?;
            files.insert(object_path(digest), bytes);
            observer.on_progress(&ExportProgress::ObjectRead {
                digest: *digest,
                done: i + 1,
                total,
            });
            cancelled(observer)?;
        }

        // 5. Ledger slice and group records.
        let entries = self.ledger.entries(range.from, range.to).await?;
        if entries.len() as u64 != range.len() {
            return Err(CustodyError::ChainBreak {
                at: range.from + entries.len() as u64,
            });
        }
        let ledger_head = entries
            .last()
            .map_or(Digest::GENESIS, |e| e.this_entry_hash);
        let mut slice = String::new();
        for entry in &entries {
            slice.push_str(&entry.to_json_line()?);
            slice.push('\n');
        }
        files.insert(LEDGER_FILE.to_string(), Bytes::from(slice));
        let groups_json =
            serde_json::to_vec_pretty(&groups).map_err(|e| CustodyError::Encoding(e.to_string()))?;
        files.insert(GROUPS_FILE.to_string(), Bytes::from(groups_json));

        // 6. Manifest id.
        let manifest_id = manifest_id(&digests, range, &group_ids, &generated_at)?;

        // 7. Two-pass statement.
        let rendered_summary_hash = if request.include_statement {
            let described: Vec<StatementObject> = objects
                .iter()
                .map(|o| StatementObject {
                    digest: o.digest,
                    byte_length: o.byte_length,
                    media_type: o.declared_media_type.clone(),
                    role: o.role.as_str().to_string(),
                })
                .collect();
            let statement = render_statement(&StatementInput {
                manifest_id,
                generated_at,
                ledger_range: range,
                ledger_head,
                objects: &described,
                groups: &groups,
            });
            files.insert(STATEMENT_FILE.to_string(), Bytes::from(statement.text));
            statement.hash
        } else {
            Digest::GENESIS
        };

        // 8. Package hash.
        let manifest = ExportManifest {
            manifest_id,
            generated_at,
            included_digests: digests,
            included_ledger_range: range,
            included_groups: group_ids,
            rendered_summary_hash,
            package_hash: Digest::GENESIS,
        };
        let package = Package::assemble(files, manifest)?;
        observer.on_progress(&ExportProgress::Assembled {
            manifest_id,
            files: package.files().len(),
        });
        cancelled(observer)?;

        // 9. Record the export. It is never part of its own slice.
        let draft = EntryDraft::new(EventKind::Exported, manifest_id, &request.accessor)
            .detail(format!("package_hash={}", package.package_hash()));
        let entry = self.ledger.append_draft(draft).await?;
        info!(
            manifest = %manifest_id,
            package_hash = %package.package_hash(),
            seq = entry.sequence_number,
            "export completed"
        );
        observer.on_progress(&ExportProgress::Completed {
            manifest_id,
            package_hash: package.package_hash(),
        });
        Ok(package)
    }
}

fn cancelled(observer: &dyn ExportObserver) -> Result<()> {
    if observer.is_cancelled() {
        debug!("export cancelled");
        return Err(CustodyError::Cancelled);
    }
    Ok(())
}
