//! Connection setup for the relational RFD store.
//!
//! # Invariants
//! - Returned connections enforce foreign keys and wait on a busy database
//!   instead of failing at once.
//! - File databases use the WAL journal.
//! - Nothing is returned before the schema is current.

use super::migrations::apply_migrations;
use crate::repo::StoreResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating when needed) the store database at `path`.
///
/// Missing parent directories are created.
pub fn open_db(path: impl AsRef<Path>) -> StoreResult<Connection> {
    let path = path.as_ref();
    traced("file", || {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|_| rusqlite::Error::InvalidPath(parent.to_path_buf()))?;
        }
        let mut conn = Connection::open(path)?;
        prepare(&mut conn, true)?;
        Ok(conn)
    })
}

/// Opens a private in-memory store database.
pub fn open_db_in_memory() -> StoreResult<Connection> {
    traced("memory", || {
        let mut conn = Connection::open_in_memory()?;
        prepare(&mut conn, false)?;
        Ok(conn)
    })
}

fn traced(mode: &str, open: impl FnOnce() -> StoreResult<Connection>) -> StoreResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={}", mode);
    let result = open();
    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn prepare(conn: &mut Connection, file_backed: bool) -> StoreResult<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    if file_backed {
        // Answers with the resulting mode, so it must be read as a row.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            info!("event=db_open module=db status=degraded journal_mode={}", mode);
        }
    }
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)
}
