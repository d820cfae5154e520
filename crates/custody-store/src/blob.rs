//! Content-addressed blob storage.
//!
//! Bytes are staged into a temporary location while being hashed, then
//! committed to their digest-derived location in one atomic step. Until the
//! commit succeeds nothing is visible under `objects/`; a crash mid-ingest
//! leaves at most a stray file under `tmp/`.
//!
//! ```text
//! <root>/
//! ├── objects/ab/abcdef…   committed, read-only
//! └── tmp/                 staging; stale files swept at open
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::NamedTempFile;

use custody_core::{Digest, DigestHasher};

use crate::error::{Result, StoreError};

const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "tmp";

/// Staging files untouched for this long are leftovers of a crash. A file
/// that is still being written keeps a fresh modification time.
const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Bytes that have been hashed and staged but not yet committed.
///
/// Dropping a staged blob discards it.
#[derive(Debug)]
pub struct StagedBlob {
    digest: Digest,
    byte_length: u64,
    payload: StagedPayload,
}

#[derive(Debug)]
enum StagedPayload {
    File(NamedTempFile),
    Memory(Bytes),
}

impl StagedBlob {
    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }
}

/// Result of committing a staged blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The blob is now stored under its digest.
    Committed,
    /// A blob with this digest was already stored; the staged copy was
    /// discarded.
    AlreadyPresent,
}

/// Physical placement of immutable bytes keyed by digest.
///
/// Methods block; callers on an async runtime run them inside
/// `spawn_blocking`. Different digests never contend.
pub trait BlobStore: Send + Sync + 'static {
    /// Read `reader` to the end in blocks of `block_size`, hashing and
    /// staging as it goes.
    fn stage(&self, reader: &mut dyn Read, block_size: usize) -> Result<StagedBlob>;

    /// Atomically move a staged blob to its permanent location. Never
    /// overwrites an existing blob.
    fn commit(&self, staged: StagedBlob) -> Result<CommitOutcome>;

    /// Open a committed blob for reading.
    fn open(&self, digest: &Digest) -> Result<Box<dyn Read + Send>>;

    fn exists(&self, digest: &Digest) -> Result<bool>;

    /// Opaque locator recorded as `storage_location`.
    fn locate(&self, digest: &Digest) -> String;

    /// Read a committed blob fully.
    fn read(&self, digest: &Digest) -> Result<Bytes> {
        let mut reader = self.open(digest)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Re-hash a committed blob end to end, in blocks of `block_size`.
    fn rehash(&self, digest: &Digest, block_size: usize) -> Result<Digest> {
        let mut reader = self.open(digest)?;
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; block_size.max(1)];
        loop {
            let n = read_block(&mut *reader, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

fn read_block(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Filesystem blob store.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (or create) a store rooted at `root` and sweep stale staging
    /// files left by an earlier crash.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
        };
        fs::create_dir_all(store.root.join(OBJECTS_DIR))?;
        fs::create_dir_all(store.staging_dir())?;
        let swept = store.sweep_staging()?;
        if swept > 0 {
            tracing::warn!(swept, root = %store.root.display(), "removed stale staging files");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// `objects/<first two hex chars>/<hex>`, relative to the root.
    fn relative_path(digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        Path::new(OBJECTS_DIR).join(&hex[..2]).join(hex)
    }

    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(Self::relative_path(digest))
    }

    /// Delete stale staging files. Returns how many were removed.
    ///
    /// Another process may share the root, so recent files are left alone.
    pub fn sweep_staging(&self) -> Result<usize> {
        self.sweep_staging_older_than(STALE_STAGING_AGE)
    }

    /// Delete staging files last modified at least `max_age` ago.
    pub fn sweep_staging_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for dirent in fs::read_dir(self.staging_dir())? {
            let dirent = dirent?;
            let metadata = dirent.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }
            match fs::remove_file(dirent.path()) {
                Ok(()) => removed += 1,
                // Committed or swept by its owner in the meantime.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

impl BlobStore for FsBlobStore {
    fn stage(&self, reader: &mut dyn Read, block_size: usize) -> Result<StagedBlob> {
        let mut temp = NamedTempFile::new_in(self.staging_dir())?;
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; block_size.max(1)];

        loop {
            let n = read_block(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            temp.write_all(&buf[..n])?;
        }
        temp.flush()?;
        temp.as_file().sync_all()?;

        Ok(StagedBlob {
            digest: hasher.finalize(),
            byte_length: hasher.length(),
            payload: StagedPayload::File(temp),
        })
    }

    fn commit(&self, staged: StagedBlob) -> Result<CommitOutcome> {
        let temp = match staged.payload {
            StagedPayload::File(temp) => temp,
            StagedPayload::Memory(_) => {
                return Err(StoreError::InvalidData(
                    "blob was staged by a different store".into(),
                ))
            }
        };

        let target = self.object_path(&staged.digest);
        if target.exists() {
            return Ok(CommitOutcome::AlreadyPresent);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        match temp.persist_noclobber(&target) {
            Ok(file) => {
                let mut permissions = file.metadata()?.permissions();
                permissions.set_readonly(true);
                fs::set_permissions(&target, permissions)?;
                Ok(CommitOutcome::Committed)
            }
            // Lost a race with a concurrent ingest of the same bytes.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(CommitOutcome::AlreadyPresent)
            }
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }

    fn open(&self, digest: &Digest) -> Result<Box<dyn Read + Send>> {
        match fs::File::open(self.object_path(digest)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(*digest)),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.object_path(digest).is_file())
    }

    fn locate(&self, digest: &Digest) -> String {
        Self::relative_path(digest).to_string_lossy().into_owned()
    }
}

/// In-memory blob store with the same contract.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Digest, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn stage(&self, reader: &mut dyn Read, block_size: usize) -> Result<StagedBlob> {
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; block_size.max(1)];
        let mut staged = Vec::new();
        loop {
            let n = read_block(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            staged.extend_from_slice(&buf[..n]);
        }
        Ok(StagedBlob {
            digest: hasher.finalize(),
            byte_length: hasher.length(),
            payload: StagedPayload::Memory(Bytes::from(staged)),
        })
    }

    fn commit(&self, staged: StagedBlob) -> Result<CommitOutcome> {
        let bytes = match staged.payload {
            StagedPayload::Memory(bytes) => bytes,
            StagedPayload::File(_) => {
                return Err(StoreError::InvalidData(
                    "blob was staged by a different store".into(),
                ))
            }
        };
        let mut blobs = self.blobs.write()?;
        if blobs.contains_key(&staged.digest) {
            return Ok(CommitOutcome::AlreadyPresent);
        }
        blobs.insert(staged.digest, bytes);
        Ok(CommitOutcome::Committed)
    }

    fn open(&self, digest: &Digest) -> Result<Box<dyn Read + Send>> {
        let bytes = self.read(digest)?;
        Ok(Box::new(io::Cursor::new(bytes)))
    }

    fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.blobs.read()?.contains_key(digest))
    }

    fn locate(&self, digest: &Digest) -> String {
        format!("memory:{}", digest.to_hex())
    }

    fn read(&self, digest: &Digest) -> Result<Bytes> {
        self.blobs
            .read()?
            .get(digest)
            .cloned()
            .ok_or(StoreError::NotFound(*digest))
    }
}
