//! SQLite implementation of the ledger, object index and group store.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{ffi, params, params_from_iter, Connection, OptionalExtension};

use custody_core::{
    canonical_entry_bytes, time, ContentObject, Digest, EventKind, GroupId, GroupRecord,
    LedgerEntry, ObjectRole, Timestamp,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AppendResult, EntryFilter, GroupStore, InsertResult, LedgerStore, ObjectIndex,
};

const ENTRY_COLUMNS: &str = "sequence_number, event_kind, subject_digest, actor_identity, \
     purpose, occurred_at, recorded_at, detail, prior_entry_hash, this_entry_hash";

const OBJECT_COLUMNS: &str = "digest, byte_length, declared_media_type, first_seen_at, \
     storage_location, role, derived_from, derivation_kind";

/// How long a writer waits on another process's lock before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock()?;
            f(&mut conn)
        })
        .await?
    }
}

fn conversion_error(idx: usize, ty: Type, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn digest_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Digest> {
    let bytes: Vec<u8> = row.get(idx)?;
    Digest::try_from(bytes.as_slice()).map_err(|e| conversion_error(idx, Type::Blob, e))
}

fn timestamp_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(idx)?;
    time::parse(&text).map_err(|e| conversion_error(idx, Type::Text, e))
}

// Column order follows ENTRY_COLUMNS. The outer error is a failed read of
// the sequence number; any other column that does not decode makes the row
// `Corrupt` at that sequence number.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LedgerEntry>> {
    let seq: u64 = row.get(0)?;
    Ok(decode_entry(row, seq).map_err(|e| StoreError::Corrupt {
        seq,
        reason: e.to_string(),
    }))
}

fn decode_entry(row: &rusqlite::Row<'_>, seq: u64) -> rusqlite::Result<LedgerEntry> {
    let kind: String = row.get(1)?;
    Ok(LedgerEntry {
        sequence_number: seq,
        event_kind: kind
            .parse::<EventKind>()
            .map_err(|e| conversion_error(1, Type::Text, e))?,
        subject_digest: digest_at(row, 2)?,
        actor_identity: row.get(3)?,
        purpose: row.get(4)?,
        occurred_at: timestamp_at(row, 5)?,
        recorded_at: timestamp_at(row, 6)?,
        detail: row.get(7)?,
        prior_entry_hash: digest_at(row, 8)?,
        this_entry_hash: digest_at(row, 9)?,
    })
}

fn collect_entries(
    rows: impl Iterator<Item = rusqlite::Result<Result<LedgerEntry>>>,
) -> Result<Vec<LedgerEntry>> {
    rows.map(|row| -> Result<LedgerEntry> { row? }).collect()
}

// Column order follows OBJECT_COLUMNS.
fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentObject> {
    let role: String = row.get(5)?;
    let role = match role.as_str() {
        "original" => ObjectRole::Original,
        "derivative" => {
            let derived_from: Option<Vec<u8>> = row.get(6)?;
            let derivation_kind: Option<String> = row.get(7)?;
            match (derived_from, derivation_kind) {
                (Some(parent), Some(derivation_kind)) => ObjectRole::Derivative {
                    derived_from: Digest::try_from(parent.as_slice())
                        .map_err(|e| conversion_error(6, Type::Blob, e))?,
                    derivation_kind,
                },
                _ => return Err(rusqlite::Error::InvalidColumnType(6, "derived_from".into(), Type::Null)),
            }
        }
        _ => return Err(rusqlite::Error::InvalidColumnType(5, "role".into(), Type::Text)),
    };

    Ok(ContentObject {
        digest: digest_at(row, 0)?,
        byte_length: row.get(1)?,
        declared_media_type: row.get(2)?,
        first_seen_at: timestamp_at(row, 3)?,
        storage_location: row.get(4)?,
        role,
    })
}

/// A clash on the table's primary key. Other constraint failures (NOT NULL,
/// triggers) are real errors and must not be mistaken for a taken slot.
fn is_primary_key_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn is_trigger_abort(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.extended_code == ffi::SQLITE_CONSTRAINT_TRIGGER
    )
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendResult> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            let canonical = canonical_entry_bytes(&entry)?;
            let inserted = conn.execute(
                "INSERT INTO ledger_entries (
                    sequence_number, event_kind, subject_digest, actor_identity, purpose,
                    occurred_at, recorded_at, detail, prior_entry_hash, this_entry_hash,
                    canonical_bytes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.sequence_number,
                    entry.event_kind.as_str(),
                    entry.subject_digest.as_bytes().as_slice(),
                    entry.actor_identity,
                    entry.purpose,
                    time::format(&entry.occurred_at),
                    time::format(&entry.recorded_at),
                    entry.detail,
                    entry.prior_entry_hash.as_bytes().as_slice(),
                    entry.this_entry_hash.as_bytes().as_slice(),
                    canonical,
                ],
            );

            match inserted {
                Ok(_) => Ok(AppendResult::Appended),
                Err(e) if is_primary_key_conflict(&e) => {
                    let existing: Vec<u8> = conn.query_row(
                        "SELECT this_entry_hash FROM ledger_entries WHERE sequence_number = ?1",
                        params![entry.sequence_number],
                        |row| row.get(0),
                    )?;
                    let existing = Digest::try_from(existing.as_slice())
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                    Ok(AppendResult::SequenceTaken { existing })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn head(&self) -> Result<Option<LedgerEntry>> {
        self.blocking(|conn| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries ORDER BY sequence_number DESC LIMIT 1"
            );
            conn.query_row(&sql, [], row_to_entry).optional()?.transpose()
        })
        .await
    }

    async fn get_entry(&self, seq: u64) -> Result<Option<LedgerEntry>> {
        self.blocking(move |conn| {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE sequence_number = ?1");
            conn.query_row(&sql, params![seq], row_to_entry)
                .optional()?
                .transpose()
        })
        .await
    }

    async fn entries_range(&self, from: u64, to: u64) -> Result<Vec<LedgerEntry>> {
        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                 WHERE sequence_number >= ?1 AND sequence_number <= ?2
                 ORDER BY sequence_number"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![from, to], row_to_entry)?;
            collect_entries(rows)
        })
        .await
    }

    async fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let filter = filter.clone();
        self.blocking(move |conn| {
            let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE 1 = 1");
            let mut args: Vec<Value> = Vec::new();

            if let Some(subject) = &filter.subject {
                sql.push_str(" AND subject_digest = ?");
                args.push(Value::Blob(subject.as_bytes().to_vec()));
            }
            if !filter.kinds.is_empty() {
                let placeholders = vec!["?"; filter.kinds.len()].join(", ");
                sql.push_str(&format!(" AND event_kind IN ({placeholders})"));
                args.extend(
                    filter
                        .kinds
                        .iter()
                        .map(|kind| Value::Text(kind.as_str().to_string())),
                );
            }
            // Fixed-width RFC 3339 text compares in time order.
            if let Some(since) = &filter.since {
                sql.push_str(" AND occurred_at >= ?");
                args.push(Value::Text(time::format(since)));
            }
            if let Some(until) = &filter.until {
                sql.push_str(" AND occurred_at < ?");
                args.push(Value::Text(time::format(until)));
            }
            sql.push_str(" ORDER BY sequence_number");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), row_to_entry)?;
            collect_entries(rows)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.blocking(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))?)
        })
        .await
    }
}

#[async_trait]
impl ObjectIndex for SqliteStore {
    async fn insert_object(&self, object: &ContentObject) -> Result<InsertResult> {
        let object = object.clone();
        self.blocking(move |conn| {
            let (derived_from, derivation_kind) = match &object.role {
                ObjectRole::Original => (None, None),
                ObjectRole::Derivative {
                    derived_from,
                    derivation_kind,
                } => (
                    Some(derived_from.as_bytes().to_vec()),
                    Some(derivation_kind.clone()),
                ),
            };

            let inserted = conn.execute(
                "INSERT INTO content_objects (
                    digest, byte_length, declared_media_type, first_seen_at,
                    storage_location, role, derived_from, derivation_kind
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    object.digest.as_bytes().as_slice(),
                    object.byte_length,
                    object.declared_media_type,
                    time::format(&object.first_seen_at),
                    object.storage_location,
                    object.role.as_str(),
                    derived_from,
                    derivation_kind,
                ],
            );

            match inserted {
                Ok(_) => Ok(InsertResult::Inserted),
                Err(e) if is_primary_key_conflict(&e) => {
                    let sql = format!("SELECT {OBJECT_COLUMNS} FROM content_objects WHERE digest = ?1");
                    let existing = conn.query_row(
                        &sql,
                        params![object.digest.as_bytes().as_slice()],
                        row_to_object,
                    )?;
                    Ok(InsertResult::AlreadyExists(existing))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_object(&self, digest: &Digest) -> Result<Option<ContentObject>> {
        let digest = *digest;
        self.blocking(move |conn| {
            let sql = format!("SELECT {OBJECT_COLUMNS} FROM content_objects WHERE digest = ?1");
            Ok(conn
                .query_row(&sql, params![digest.as_bytes().as_slice()], row_to_object)
                .optional()?)
        })
        .await
    }

    async fn list_objects(&self) -> Result<Vec<ContentObject>> {
        self.blocking(|conn| {
            let sql = format!("SELECT {OBJECT_COLUMNS} FROM content_objects ORDER BY digest");
            let mut stmt = conn.prepare(&sql)?;
            let objects = stmt
                .query_map([], row_to_object)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(objects)
        })
        .await
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRecord> {
    let json: String = row.get(0)?;
    serde_json::from_str(&json).map_err(|e| conversion_error(0, Type::Text, e))
}

#[async_trait]
impl GroupStore for SqliteStore {
    async fn insert_group(&self, record: &GroupRecord) -> Result<bool> {
        let record = record.clone();
        self.blocking(move |conn| {
            let json = serde_json::to_string(&record)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let inserted = conn.execute(
                "INSERT INTO groups (group_id, label, is_sealed, snapshot_digest, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.group_id.as_subject().as_bytes().as_slice(),
                    record.label,
                    record.is_sealed,
                    record.snapshot_digest.map(|d| d.as_bytes().to_vec()),
                    json,
                ],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(e) if is_primary_key_conflict(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update_group(&self, record: &GroupRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |conn| {
            let json = serde_json::to_string(&record)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let updated = conn.execute(
                "UPDATE groups SET label = ?2, is_sealed = ?3, snapshot_digest = ?4, record = ?5
                 WHERE group_id = ?1",
                params![
                    record.group_id.as_subject().as_bytes().as_slice(),
                    record.label,
                    record.is_sealed,
                    record.snapshot_digest.map(|d| d.as_bytes().to_vec()),
                    json,
                ],
            );
            match updated {
                Ok(0) => Err(StoreError::InvalidData(format!(
                    "group {} is not stored",
                    record.group_id
                ))),
                Ok(_) => Ok(()),
                Err(e) if is_trigger_abort(&e) => Err(StoreError::GroupFrozen(record.group_id)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn remove_group(&self, group: &GroupId) -> Result<()> {
        let group = *group;
        self.blocking(move |conn| {
            match conn.execute(
                "DELETE FROM groups WHERE group_id = ?1",
                params![group.as_subject().as_bytes().as_slice()],
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_trigger_abort(&e) => Err(StoreError::GroupFrozen(group)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn load_groups(&self) -> Result<Vec<GroupRecord>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT record FROM groups ORDER BY group_id")?;
            let groups = stmt
                .query_map([], row_to_group)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
        .await
    }
}
