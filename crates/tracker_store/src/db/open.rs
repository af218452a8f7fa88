//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure pragmas required by the store (foreign keys, WAL, busy wait).
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::{apply_migrations, latest_version};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const ISSUE_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "design",
    "acceptance_criteria",
    "notes",
    "status",
    "priority",
    "issue_type",
    "assignee",
    "estimated_minutes",
    "created_at",
    "updated_at",
    "closed_at",
    "approved_at",
    "approved_by",
];

const EVENT_COLUMNS: &[&str] = &[
    "id",
    "issue_id",
    "event_type",
    "actor",
    "old_value",
    "new_value",
    "comment",
    "created_at",
];

/// Opens (creating if needed) a SQLite database file and applies all
/// pending migrations.
///
/// Missing parent directories are created first.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let result = prepare_parent_dir(path)
        .and_then(|()| Connection::open(path).map_err(DbError::from))
        .and_then(|mut conn| {
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| {
                row.get::<_, String>(0)
            })?;
            bootstrap_connection(&mut conn, busy_timeout)?;
            Ok(conn)
        });

    log_open_result("file", started_at, result)
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let result = Connection::open_in_memory()
        .map_err(DbError::from)
        .and_then(|mut conn| {
            bootstrap_connection(&mut conn, Duration::ZERO)?;
            Ok(conn)
        });

    log_open_result("memory", started_at, result)
}

/// Checks that a caller-provided connection is migrated to the version this
/// binary expects and carries every table and column the store reads.
pub fn ensure_schema_ready(conn: &Connection) -> DbResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(DbError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for (table, columns) in [("issues", ISSUE_COLUMNS), ("events", EVENT_COLUMNS)] {
        if !table_exists(conn, table)? {
            return Err(DbError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(DbError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn prepare_parent_dir(path: &Path) -> DbResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir).map_err(|source| DbError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if !busy_timeout.is_zero() {
        conn.busy_timeout(busy_timeout)?;
    }
    apply_migrations(conn)?;
    Ok(())
}

fn log_open_result(
    mode: &str,
    started_at: Instant,
    result: DbResult<Connection>,
) -> DbResult<Connection> {
    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
