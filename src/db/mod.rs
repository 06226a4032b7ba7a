//! SQLite-based persistence for sheets, attributes, entities, and cell values.
//!
//! The database lives at `~/.trackerdb/tracker.db`. The handle is cheap to
//! clone — all clones share one connection behind a `parking_lot::Mutex` and
//! one observer registry — so live queries and cell editors can hold their
//! own copies. Multi-statement operations run inside a single transaction;
//! committed writes notify table observers only after the connection lock is
//! released, so observers re-reading the store always see post-write state.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::live::ChangeBus;

pub mod types;
pub use types::*;

pub mod attributes;
pub mod cells;
pub mod entities;
pub mod sheets;

pub(crate) struct Shared {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) bus: ChangeBus,
}

/// Handle to the tracker store.
#[derive(Clone)]
pub struct TrackerDb {
    pub(crate) shared: Arc<Shared>,
}

/// Non-owning handle used by observer callbacks so a subscription never
/// keeps the store alive on its own.
pub(crate) struct WeakTrackerDb(Weak<Shared>);

impl WeakTrackerDb {
    pub(crate) fn upgrade(&self) -> Option<TrackerDb> {
        self.0.upgrade().map(|shared| TrackerDb { shared })
    }
}

impl TrackerDb {
    /// Open (or create) the database at `~/.trackerdb/tracker.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, TrackerError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a database at an explicit path. Useful for testing and for
    /// applications that manage their own data directory.
    pub fn open_at(path: PathBuf) -> Result<Self, TrackerError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(TrackerError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        log::info!("opened tracker database at {}", path.display());
        Self::from_conn(conn)
    }

    /// Open a transient in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self, TrackerError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, TrackerError> {
        // Apply schema (all statements use IF NOT EXISTS, so this is idempotent)
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                bus: ChangeBus::default(),
            }),
        })
    }

    /// Resolve the default database path: `~/.trackerdb/tracker.db`.
    fn db_path() -> Result<PathBuf, TrackerError> {
        let home = dirs::home_dir().ok_or(TrackerError::HomeDirNotFound)?;
        Ok(home.join(".trackerdb").join("tracker.db"))
    }

    pub(crate) fn downgrade(&self) -> WeakTrackerDb {
        WeakTrackerDb(Arc::downgrade(&self.shared))
    }
}

/// Execute a closure within a SQLite transaction.
/// Commits on Ok, rolls back on Err.
pub(crate) fn with_txn<T, F>(conn: &Connection, f: F) -> Result<T, TrackerError>
where
    F: FnOnce(&Connection) -> Result<T, TrackerError>,
{
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// =============================================================================
// Row-mapping helpers
// =============================================================================

pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn datetime_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Advance a sheet's `updated_at` to `now`, never moving it backwards.
/// Timestamps are canonical RFC 3339 written by chrono, so the SQL MAX
/// (lexicographic on TEXT) compares instants correctly.
pub(crate) fn touch_sheet(
    conn: &Connection,
    sheet_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), TrackerError> {
    let rows = conn.execute(
        "UPDATE sheets SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
        params![now.to_rfc3339(), sheet_id.to_string()],
    )?;
    if rows == 0 {
        return Err(TrackerError::not_found("sheet", sheet_id));
    }
    Ok(())
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub(crate) mod test_utils {
    use super::TrackerDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of
    /// the test. Test temp dirs are cleaned up by the OS.
    pub(crate) fn test_db() -> TrackerDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        TrackerDb::open_at(path).expect("Failed to open test database")
    }
}

// =============================================================================
// Tests
// =============================================================================
