//! A thin convenience layer over SQLite.
//!
//! [`Db::open`] builds a connection pool, applies every pending migration,
//! and only then hands out a handle. The handle's query helpers take a
//! [`Context`] as their first argument and transparently run inside the
//! transaction carried by that context, if there is one.
//!
//! ```rust,no_run
//! use easylite_context::Context;
//! use easylite_db::{params, Db, Error, Migrations};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let migrations = Migrations::embedded(
//!     "migrations",
//!     &[(
//!         "migrations/00001_create_users.sql",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, balance INTEGER NOT NULL);",
//!     )],
//! )?;
//! let db = Db::open("app.sqlite", &migrations)?;
//!
//! let ctx = Context::background();
//! db.exec(&ctx, "INSERT INTO users (name, balance) VALUES (?1, ?2)", params!["Sam", 400])?;
//!
//! db.run_in_transaction(&ctx, |ctx| {
//!     // Runs inside the transaction because `ctx` carries it.
//!     let balance: i64 = db.get(ctx, "SELECT balance FROM users WHERE name = ?1", ["Sam"])?;
//!     db.exec(ctx, "UPDATE users SET balance = ?1 WHERE name = ?2", params![balance - 100, "Sam"])?;
//!     Ok::<_, Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Design decisions
//!
//! - **Explicit context passing**: the transaction travels in the context
//!   rather than in a thread-local, so it follows the call chain across
//!   threads and never leaks into unrelated work on the same thread.
//! - **`r2d2` connection pool with WAL mode**: concurrent readers outside a
//!   transaction each use their own connection while one writer holds the
//!   write lock.
//! - **Migrations gate startup**: a handle exists only once the schema is
//!   current.

mod error;
mod interrupt;
mod methods;
mod migrations;
mod pool;
mod row;
mod transactions;
mod tx;
mod txctx;

use std::fmt;
use std::path::Path;

pub use easylite_context::{CancelHandle, Context, ContextError};
pub use error::{Error, OpenError};
pub use methods::ExecResult;
pub use migrations::{run_migrations, Migration, MigrationError, Migrations};
pub use pool::{create_pool, ConnectionManager, DbPool, PoolError, Settings};
pub use row::FromRow;
pub use rusqlite;
pub use rusqlite::params;

/// Handle to an open, fully migrated database.
///
/// Cloning is cheap and clones share the pool.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
}

impl Db {
    /// Opens (creating if needed) the database at `path` with default
    /// [`Settings`] and applies all pending `migrations`.
    ///
    /// # Errors
    ///
    /// Returns `OpenError` if the pool cannot be built or a migration fails.
    pub fn open(path: impl AsRef<Path>, migrations: &Migrations) -> Result<Self, OpenError> {
        Self::open_with(path, migrations, Settings::default())
    }

    /// Like [`open`](Self::open), with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns `OpenError` if the pool cannot be built or a migration fails.
    pub fn open_with(
        path: impl AsRef<Path>,
        migrations: &Migrations,
        settings: Settings,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let pool = create_pool(path, settings)?;

        {
            let conn = pool.get().map_err(OpenError::Connection)?;
            let applied = run_migrations(&conn, migrations)?;
            if applied > 0 {
                tracing::info!(
                    path = %path.display(),
                    count = applied,
                    "applied database migrations"
                );
            }
        }

        Ok(Self { pool })
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("state", &self.pool.state())
            .finish()
    }
}
