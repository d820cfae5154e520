//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each step transforms the schema from version N to
//! N+1 inside one transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, custody_core::time::format(&custody_core::time::now())],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: ledger and object index.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Append-only audit ledger
        CREATE TABLE ledger_entries (
            sequence_number INTEGER PRIMARY KEY,  -- 1-indexed, gapless
            event_kind TEXT NOT NULL,
            subject_digest BLOB NOT NULL,         -- 32 bytes
            actor_identity TEXT NOT NULL,
            purpose TEXT NOT NULL,
            occurred_at TEXT NOT NULL,            -- RFC 3339, fixed width
            recorded_at TEXT NOT NULL,            -- RFC 3339, fixed width
            detail TEXT,
            prior_entry_hash BLOB NOT NULL,       -- 32 bytes
            this_entry_hash BLOB NOT NULL,        -- 32 bytes
            canonical_bytes BLOB NOT NULL         -- hashed encoding, for SQL-only auditors
        );

        CREATE TRIGGER ledger_entries_no_update BEFORE UPDATE ON ledger_entries
        BEGIN
            SELECT RAISE(ABORT, 'ledger entries are append-only');
        END;

        CREATE TRIGGER ledger_entries_no_delete BEFORE DELETE ON ledger_entries
        BEGIN
            SELECT RAISE(ABORT, 'ledger entries are append-only');
        END;

        -- Content object index; rows appear only after the blob is committed
        CREATE TABLE content_objects (
            digest BLOB PRIMARY KEY,              -- 32 bytes
            byte_length INTEGER NOT NULL,
            declared_media_type TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            storage_location TEXT NOT NULL,
            role TEXT NOT NULL,                   -- 'original' | 'derivative'
            derived_from BLOB,
            derivation_kind TEXT
        );

        CREATE TRIGGER content_objects_no_update BEFORE UPDATE ON content_objects
        BEGIN
            SELECT RAISE(ABORT, 'content objects are immutable');
        END;

        CREATE INDEX idx_entries_subject ON ledger_entries(subject_digest);
        CREATE INDEX idx_entries_kind ON ledger_entries(event_kind);
        CREATE INDEX idx_entries_occurred ON ledger_entries(occurred_at);
        CREATE INDEX idx_objects_derived_from ON content_objects(derived_from);
        "#,
    )?;

    Ok(())
}

/// Migration v2: durable groups.
///
/// `record` holds the JSON group record with members and offsets. Once
/// `is_sealed` is set the row can no longer change.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE groups (
            group_id BLOB PRIMARY KEY,            -- 32 bytes, derived from label
            label TEXT NOT NULL,
            is_sealed INTEGER NOT NULL DEFAULT 0,
            snapshot_digest BLOB,                 -- set when sealed
            record TEXT NOT NULL
        );

        CREATE TRIGGER groups_sealed_no_update BEFORE UPDATE ON groups
        WHEN OLD.is_sealed = 1
        BEGIN
            SELECT RAISE(ABORT, 'sealed groups are immutable');
        END;

        CREATE TRIGGER groups_sealed_no_delete BEFORE DELETE ON groups
        WHEN OLD.is_sealed = 1
        BEGIN
            SELECT RAISE(ABORT, 'sealed groups are immutable');
        END;
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"ledger_entries".to_string()));
        assert!(tables.contains(&"content_objects".to_string()));
        assert!(tables.contains(&"groups".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_ledger_rows_are_append_only() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO ledger_entries VALUES (1, 'ingest', x'00', 'a', 'p', 't', 't', NULL, x'00', x'00', x'00')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE ledger_entries SET purpose = 'x'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM ledger_entries", []).is_err());
    }

    #[test]
    fn test_upgrades_v1_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);
             INSERT INTO schema_migrations VALUES (1, 'earlier');",
        )
        .unwrap();
        apply_v1(&conn).unwrap();

        migrate(&mut conn).unwrap();
        let versions: Vec<u32> = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_sealed_group_rows_are_frozen() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO groups VALUES (x'01', 'open', 0, NULL, '{}'), (x'02', 'closed', 1, x'00', '{}')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE groups SET record = 'x' WHERE label = 'open'", [])
            .is_ok());
        assert!(conn
            .execute("UPDATE groups SET record = 'x' WHERE label = 'closed'", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM groups WHERE label = 'closed'", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM groups WHERE label = 'open'", [])
            .is_ok());
    }

    #[test]
    fn test_rejects_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 'later')",
            [],
        )
        .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
