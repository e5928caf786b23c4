//! Error types for query execution, transactions, and startup.

use easylite_context::ContextError;

use crate::migrations::MigrationError;
use crate::pool::PoolError;

/// Errors returned by query helpers and the transaction coordinator.
///
/// Query failures are passed through as-is. Only the transaction boundaries
/// add a label ([`Error::Begin`], [`Error::Commit`]), so an error returned
/// from [`Db::run_in_transaction`](crate::Db::run_in_transaction) that is
/// neither of those came from the caller's own unit of work.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The SQLite driver rejected or failed the statement.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// The context was cancelled or its deadline passed, either before the
    /// call started or while the statement was running.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// No pooled connection became available in time.
    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    /// A single-row query matched more than one row.
    #[error("query returned more than one row")]
    MultipleRows,

    /// The transaction attached to the context has already been committed or
    /// rolled back.
    #[error("transaction has already been committed or rolled back")]
    TxDone,

    /// SQLite rolled the transaction back by itself (for example through
    /// `INSERT OR ROLLBACK` or an interrupted write). Nothing written in it
    /// was kept, and no further statements run on it.
    #[error("transaction was rolled back by the database")]
    TxAborted,

    /// The transaction (or savepoint) could not be started.
    #[error("begin transaction: {0}")]
    Begin(#[source] Box<Error>),

    /// The transaction (or savepoint) could not be committed.
    #[error("commit: {0}")]
    Commit(#[source] Box<Error>),
}

impl Error {
    /// Returns the cancellation reason if this error, or the error it wraps,
    /// was caused by the context being done.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(err) => Some(*err),
            Self::Begin(inner) | Self::Commit(inner) => inner.context_error(),
            _ => None,
        }
    }

    pub(crate) fn is_interrupt(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }
}

/// Errors that abort [`Db::open`](crate::Db::open). No handle exists when
/// one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The connection pool could not be built, including failures of the
    /// per-connection pragmas.
    #[error("creating connection pool: {0}")]
    Pool(#[from] PoolError),

    /// No connection could be checked out to run migrations on.
    #[error("checking out migration connection: {0}")]
    Connection(#[source] r2d2::Error),

    /// A migration failed or the migration state could not be read.
    #[error("applying migrations: {0}")]
    Migrate(#[from] MigrationError),
}
