//! Connection pool creation and configuration.

use std::path::Path;
use std::time::Duration;

use r2d2::{ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use thiserror::Error;

/// Runtime tunables for the SQLite connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Busy timeout for SQLite connections, in milliseconds. Also bounds how
    /// long `BEGIN IMMEDIATE` waits for another writer.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections. Forced to 1 for `:memory:`.
    pub pool_max_size: u32,

    /// How long a checkout waits for a free connection, in milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connection_timeout_ms: 30_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<ConnectionManager>;

/// Opens SQLite connections for the pool and keeps connections that are
/// still inside a transaction out of circulation.
///
/// A connection whose `ROLLBACK` failed is dropped on check-in instead of
/// being handed to the next caller, whose `BEGIN` would otherwise fail.
pub struct ConnectionManager {
    inner: SqliteConnectionManager,
}

impl ManageConnection for ConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        self.inner.connect()
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        self.inner.is_valid(conn)?;
        if conn.is_autocommit() {
            Ok(())
        } else {
            Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some("pooled connection is still inside a transaction".to_string()),
            ))
        }
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        let open_tx = !conn.is_autocommit();
        if open_tx {
            tracing::warn!("discarding pooled connection left inside a transaction");
        }
        open_tx
    }
}

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// Every pooled connection to `:memory:` would open its own private
/// database, so in-memory pools hold exactly one connection.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the pool cannot be built, which includes
/// a connection refusing WAL mode.
pub fn create_pool(db_path: &Path, settings: Settings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let inner = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // The busy timeout goes first: sibling connections may be
            // switching the journal mode at the same moment.
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))?;

            // In-memory databases report "memory", which is accepted.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {journal_mode}"
                    )),
                ));
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });

    let max_size = if is_in_memory(db_path) {
        1
    } else {
        settings.pool_max_size.max(1)
    };

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
        .build(ConnectionManager { inner })?;

    tracing::debug!(
        path = %db_path.display(),
        max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "database pool ready"
    );

    Ok(pool)
}

fn is_in_memory(db_path: &Path) -> bool {
    db_path.as_os_str() == ":memory:"
}
