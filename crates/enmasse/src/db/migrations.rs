//! Versioned schema changes for the object catalog.
//!
//! Each applied version is recorded in `_migrations` together with the
//! change it made. A version and its bookkeeping row are written in one
//! transaction, so an interrupted upgrade resumes at the failed step.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::DatabaseError;

/// A schema change. `unless_column` names a `(table, column)` pair that,
/// when already present, means the change is in place and only needs
/// recording.
struct SchemaVersion {
    version: u32,
    description: &'static str,
    sql: &'static str,
    unless_column: Option<(&'static str, &'static str)>,
}

const VERSIONS: &[SchemaVersion] = &[
    SchemaVersion {
        version: 1,
        description: "create_objects_table",
        sql: include_str!("sql/001_create_objects.sql"),
        unless_column: None,
    },
    SchemaVersion {
        version: 2,
        description: "add_updated_at_to_objects",
        sql: include_str!("sql/002_add_updated_at.sql"),
        unless_column: Some(("objects", "updated_at")),
    },
];

/// Newest schema version this build knows about.
pub fn latest_version() -> u32 {
    VERSIONS.last().map(|v| v.version).unwrap_or(0)
}

/// Brings the catalog schema up to [`latest_version`].
///
/// Fails without touching anything when the database was written by a
/// newer build.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = applied_version(conn)?;
    if applied > latest_version() {
        return Err(DatabaseError::Migration {
            version: applied,
            reason: format!(
                "database schema is newer than this build supports (v{})",
                latest_version()
            ),
        });
    }

    for step in VERSIONS.iter().filter(|v| v.version > applied) {
        apply(conn, step).map_err(|e| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM _migrations", [], |r| r.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn apply(conn: &Connection, step: &SchemaVersion) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let already_present = match step.unless_column {
        Some((table, column)) => has_column(&tx, table, column)?,
        None => false,
    };

    if already_present {
        log::debug!("Schema v{} already in place, recording only", step.version);
    } else {
        log::info!("Upgrading catalog schema to v{}: {}", step.version, step.description);
        tx.execute_batch(step.sql)?;
    }

    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![step.version, step.description],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
