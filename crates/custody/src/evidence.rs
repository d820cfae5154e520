//! The content-addressed evidence store.
//!
//! Bytes are staged and hashed in one streaming pass, committed by an atomic
//! rename, and only then indexed. Every interaction appends a ledger entry.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use custody_core::{
    time, Accessor, ContentObject, Digest, EntryDraft, EventKind, LedgerEntry, ObjectRole,
};
use custody_store::{BlobStore, InsertResult, LedgerStore, ObjectIndex, StoreError};
use tracing::{debug, error, info, warn};

use crate::error::{CustodyError, Result};
use crate::ledger::Ledger;
use crate::retry::RetryConfig;

/// An ingest of original evidence.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub media_type: String,
    /// Recorded in the ledger entry's detail when present.
    pub filename: Option<String>,
    pub accessor: Accessor,
}

impl IngestRequest {
    pub fn new(media_type: impl Into<String>, accessor: Accessor) -> Self {
        Self {
            media_type: media_type.into(),
            filename: None,
            accessor,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// An ingest of bytes derived from an already stored object.
#[derive(Debug, Clone)]
pub struct DerivativeRequest {
    pub derived_from: Digest,
    /// What produced it, e.g. `transcript` or `redaction`.
    pub derivation_kind: String,
    pub media_type: String,
    pub accessor: Accessor,
}

/// Result of a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// The indexed object. On a duplicate this is the existing record.
    pub object: ContentObject,
    pub duplicate: bool,
    /// The ledger entry recording this put.
    pub entry: LedgerEntry,
}

/// A successful end-to-end re-hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub digest: Digest,
    pub byte_length: u64,
    pub entry: LedgerEntry,
}

/// Content-addressed evidence store with ledgered access.
pub struct EvidenceStore<S> {
    index: Arc<S>,
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<Ledger<S>>,
    block_size: usize,
    retry: RetryConfig,
}

impl<S: LedgerStore + ObjectIndex + 'static> EvidenceStore<S> {
    pub fn new(
        index: Arc<S>,
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<Ledger<S>>,
        block_size: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            index,
            blobs,
            ledger,
            block_size,
            retry,
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    /// Store original evidence read from `reader`.
    ///
    /// Ingesting bytes that are already indexed keeps the single stored copy
    /// and records `ingest_duplicate_detected` instead of `ingest`.
    pub async fn put<R>(&self, reader: R, request: IngestRequest) -> Result<PutOutcome>
    where
        R: Read + Send + 'static,
    {
        require_media_type(&request.media_type)?;
        let mut detail = Vec::new();
        if let Some(filename) = &request.filename {
            detail.push(format!("filename={filename}"));
        }
        detail.push(format!("media_type={}", request.media_type));

        self.store_object(
            reader,
            request.media_type,
            ObjectRole::Original,
            EventKind::Ingest,
            detail,
            &request.accessor,
        )
        .await
    }

    /// Store a derivative of an existing object.
    pub async fn put_derivative<R>(&self, reader: R, request: DerivativeRequest) -> Result<PutOutcome>
    where
        R: Read + Send + 'static,
    {
        require_media_type(&request.media_type)?;
        if request.derivation_kind.trim().is_empty() {
            return Err(CustodyError::InvalidRequest(
                "derivation_kind must not be empty".into(),
            ));
        }
        if self.object(&request.derived_from).await?.is_none() {
            return Err(CustodyError::MissingContent(request.derived_from));
        }

        let detail = vec![
            format!("derived_from={}", request.derived_from),
            format!("derivation_kind={}", request.derivation_kind),
            format!("media_type={}", request.media_type),
        ];
        self.store_object(
            reader,
            request.media_type,
            ObjectRole::Derivative {
                derived_from: request.derived_from,
                derivation_kind: request.derivation_kind,
            },
            EventKind::DerivativeCreated,
            detail,
            &request.accessor,
        )
        .await
    }

    async fn store_object<R>(
        &self,
        reader: R,
        media_type: String,
        role: ObjectRole,
        kind: EventKind,
        detail: Vec<String>,
        accessor: &Accessor,
    ) -> Result<PutOutcome>
    where
        R: Read + Send + 'static,
    {
        let blobs = self.blobs.clone();
        let block_size = self.block_size;
        let (digest, byte_length, committed) = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let staged = blobs.stage(&mut reader, block_size)?;
            let digest = staged.digest();
            let byte_length = staged.byte_length();
            let outcome = blobs.commit(staged)?;
            Ok::<_, StoreError>((digest, byte_length, outcome))
        })
        .await??;
        debug!(%digest, byte_length, ?committed, "blob committed");

        let object = ContentObject {
            digest,
            byte_length,
            declared_media_type: media_type,
            first_seen_at: time::now(),
            storage_location: self.blobs.locate(&digest),
            role,
        };

        let index = &self.index;
        let candidate = &object;
        let inserted = self
            .retry
            .execute("insert_object", move || index.insert_object(candidate))
            .await?;

        match inserted {
            InsertResult::Inserted => {
                let entry = self
                    .ledger
                    .append_draft(
                        EntryDraft::new(kind, digest, accessor).detail(detail.join("; ")),
                    )
                    .await?;
                info!(%digest, byte_length, seq = entry.sequence_number, kind = %kind, "evidence stored");
                Ok(PutOutcome {
                    object,
                    duplicate: false,
                    entry,
                })
            }
            InsertResult::AlreadyExists(existing) => {
                let entry = self
                    .ledger
                    .append_draft(
                        EntryDraft::new(EventKind::IngestDuplicateDetected, digest, accessor)
                            .detail(detail.join("; ")),
                    )
                    .await?;
                warn!(%digest, seq = entry.sequence_number, "duplicate ingest detected");
                Ok(PutOutcome {
                    object: existing,
                    duplicate: true,
                    entry,
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Read an object's bytes, recording `accessed`.
    pub async fn get(&self, digest: &Digest, accessor: &Accessor) -> Result<Bytes> {
        self.read_logged(digest, accessor, EventKind::Accessed).await
    }

    /// Read an object's bytes for download, recording `downloaded`.
    pub async fn download(&self, digest: &Digest, accessor: &Accessor) -> Result<Bytes> {
        self.read_logged(digest, accessor, EventKind::Downloaded).await
    }

    async fn read_logged(
        &self,
        digest: &Digest,
        accessor: &Accessor,
        kind: EventKind,
    ) -> Result<Bytes> {
        self.require_object(digest).await?;
        let bytes = self.read_blob(digest).await?;
        let entry = self.ledger.append(kind, *digest, accessor).await?;
        debug!(%digest, seq = entry.sequence_number, kind = %kind, "evidence read");
        Ok(bytes)
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Bytes> {
        let digest = *digest;
        let blobs = &self.blobs;
        let bytes = self
            .retry
            .execute("read_blob", move || {
                let blobs = blobs.clone();
                async move {
                    tokio::task::spawn_blocking(move || blobs.read(&digest)).await?
                }
            })
            .await?;
        Ok(bytes)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Re-hash the stored bytes end to end.
    ///
    /// A mismatch records `hash_verification_failed` and returns
    /// [`CustodyError::IntegrityViolation`]. Nothing is repaired.
    pub async fn verify(&self, digest: &Digest, accessor: &Accessor) -> Result<Verification> {
        let object = self.require_object(digest).await?;

        let blobs = self.blobs.clone();
        let target = *digest;
        let block_size = self.block_size;
        let rehashed = tokio::task::spawn_blocking(move || blobs.rehash(&target, block_size)).await?;

        let actual = match rehashed {
            Ok(actual) => actual,
            Err(StoreError::NotFound(_)) => {
                self.record_failure(digest, accessor, "blob_missing").await?;
                error!(%digest, "indexed object has no stored bytes");
                return Err(CustodyError::MissingContent(*digest));
            }
            Err(e) => return Err(e.into()),
        };

        if actual != *digest {
            self.record_failure(digest, accessor, &format!("actual={actual}"))
                .await?;
            error!(%digest, %actual, "integrity violation: stored bytes do not match digest");
            return Err(CustodyError::IntegrityViolation {
                digest: *digest,
                expected: *digest,
                actual,
            });
        }

        let entry = self
            .ledger
            .append(EventKind::HashVerified, *digest, accessor)
            .await?;
        info!(%digest, seq = entry.sequence_number, "hash verified");
        Ok(Verification {
            digest: *digest,
            byte_length: object.byte_length,
            entry,
        })
    }

    /// Read bytes and check them against their digest without recording a
    /// successful read. A mismatch is still recorded.
    pub(crate) async fn read_verified(&self, digest: &Digest, accessor: &Accessor) -> Result<Bytes> {
        let bytes = self.read_blob(digest).await?;
        let actual = Digest::hash(&bytes);
        if actual != *digest {
            self.record_failure(digest, accessor, &format!("actual={actual}"))
                .await?;
            error!(%digest, %actual, "integrity violation during export");
            return Err(CustodyError::IntegrityViolation {
                digest: *digest,
                expected: *digest,
                actual,
            });
        }
        Ok(bytes)
    }

    async fn record_failure(&self, digest: &Digest, accessor: &Accessor, detail: &str) -> Result<()> {
        self.ledger
            .append_draft(
                EntryDraft::new(EventKind::HashVerificationFailed, *digest, accessor).detail(detail),
            )
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Indexed metadata for a digest. Not ledgered.
    pub async fn object(&self, digest: &Digest) -> Result<Option<ContentObject>> {
        let index = &self.index;
        Ok(self
            .retry
            .execute("get_object", move || index.get_object(digest))
            .await?)
    }

    /// All indexed objects, ordered by digest. Not ledgered.
    pub async fn objects(&self) -> Result<Vec<ContentObject>> {
        let index = &self.index;
        Ok(self
            .retry
            .execute("list_objects", move || index.list_objects())
            .await?)
    }

    pub(crate) async fn require_object(&self, digest: &Digest) -> Result<ContentObject> {
        self.object(digest)
            .await?
            .ok_or(CustodyError::MissingContent(*digest))
    }
}

fn require_media_type(media_type: &str) -> Result<()> {
    if media_type.trim().is_empty() {
        return Err(CustodyError::InvalidRequest(
            "declared media type must not be empty".into(),
        ));
    }
    Ok(())
}
