//! The transaction object shared through a context.
//!
//! A [`Tx`] owns one pooled connection on which `BEGIN IMMEDIATE` succeeded.
//! Clones share the same connection behind a mutex, so context clones handed
//! to several threads serialise onto the one transaction. The connection goes
//! back to the pool when the transaction commits or rolls back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use easylite_context::Context;
use r2d2::PooledConnection;
use rusqlite::Connection;

use crate::error::Error;
use crate::interrupt;
use crate::pool::{ConnectionManager, DbPool};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub(crate) struct Tx {
    inner: Arc<TxInner>,
}

struct TxInner {
    id: u64,
    state: Mutex<TxState>,
}

enum TxState {
    Active {
        conn: PooledConnection<ConnectionManager>,
        savepoints: u32,
    },
    Committed,
    RolledBack,
    /// SQLite ended the transaction on its own, e.g. after `INSERT OR
    /// ROLLBACK` or an interrupted write.
    Aborted,
}

impl Tx {
    /// Checks out a connection and starts a serializable read-write
    /// transaction on it.
    pub(crate) fn begin(pool: &DbPool, ctx: &Context) -> Result<Self, Error> {
        ctx.check()?;
        let conn = pool.get()?;
        interrupt::observe(ctx, &conn, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(())
        })?;

        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx = id, "transaction started");

        Ok(Self {
            inner: Arc::new(TxInner {
                id,
                state: Mutex::new(TxState::Active {
                    conn,
                    savepoints: 0,
                }),
            }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether both handles refer to the same transaction.
    #[cfg(test)]
    pub(crate) fn same_as(&self, other: &Tx) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` on the transaction's connection, holding the transaction lock
    /// for the duration. `f` must not re-enter this transaction.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut state = self.lock();
        self.ensure_open(&mut state)?;
        match &*state {
            TxState::Active { conn, .. } => f(conn),
            _ => Err(Error::TxDone),
        }
    }

    /// Commits the transaction and returns its connection to the pool.
    ///
    /// A failed `COMMIT` leaves the transaction active so that the caller's
    /// rollback can still run.
    pub(crate) fn commit(&self, ctx: &Context) -> Result<(), Error> {
        let mut state = self.lock();
        self.ensure_open(&mut state)?;
        let TxState::Active { conn, .. } = &*state else {
            return Err(Error::TxDone);
        };
        interrupt::observe(ctx, conn, |conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
        })?;
        *state = TxState::Committed;
        tracing::debug!(tx = self.inner.id, "transaction committed");
        Ok(())
    }

    /// Rolls the transaction back.
    ///
    /// Returns `Ok(false)` when there was nothing left to roll back: the
    /// transaction had already finished, or SQLite had already rolled it back
    /// on its own (for example after an interrupted statement).
    ///
    /// The connection is released either way. If `ROLLBACK` itself fails the
    /// connection is still inside a transaction, and the pool discards it
    /// instead of handing it out again.
    pub(crate) fn rollback(&self) -> Result<bool, Error> {
        let mut state = self.lock();
        let TxState::Active { conn, .. } = &*state else {
            return Ok(false);
        };
        let result = if conn.is_autocommit() {
            Ok(false)
        } else {
            conn.execute_batch("ROLLBACK").map(|()| true)
        };
        *state = TxState::RolledBack;
        Ok(result?)
    }

    /// Opens a savepoint and returns its depth.
    pub(crate) fn savepoint(&self, ctx: &Context) -> Result<u32, Error> {
        let mut state = self.lock();
        self.ensure_open(&mut state)?;
        let TxState::Active { conn, savepoints } = &mut *state else {
            return Err(Error::TxDone);
        };
        let depth = *savepoints + 1;
        interrupt::observe(ctx, conn, |conn| {
            conn.execute_batch(&format!("SAVEPOINT {}", savepoint_name(depth)))?;
            Ok(())
        })?;
        *savepoints = depth;
        tracing::debug!(tx = self.inner.id, depth, "savepoint opened");
        Ok(depth)
    }

    /// Folds the savepoint at `depth` into the enclosing scope.
    pub(crate) fn release(&self, ctx: &Context, depth: u32) -> Result<(), Error> {
        let mut state = self.lock();
        self.ensure_open(&mut state)?;
        let TxState::Active { conn, savepoints } = &mut *state else {
            return Err(Error::TxDone);
        };
        interrupt::observe(ctx, conn, |conn| {
            conn.execute_batch(&format!("RELEASE {}", savepoint_name(depth)))?;
            Ok(())
        })?;
        *savepoints = depth - 1;
        tracing::debug!(tx = self.inner.id, depth, "savepoint released");
        Ok(())
    }

    /// Undoes everything since the savepoint at `depth` and discards it.
    pub(crate) fn rollback_to(&self, depth: u32) -> Result<bool, Error> {
        let mut state = self.lock();
        let aborted = match &*state {
            TxState::Active { conn, .. } => conn.is_autocommit(),
            _ => return Ok(false),
        };
        if aborted {
            *state = TxState::Aborted;
            return Ok(false);
        }
        let TxState::Active { conn, savepoints } = &mut *state else {
            return Ok(false);
        };
        *savepoints = depth - 1;
        let name = savepoint_name(depth);
        conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
        Ok(true)
    }

    /// Fails unless the transaction is still open on its connection.
    ///
    /// Once SQLite has rolled the transaction back by itself, further
    /// statements on the connection would run in autocommit mode and persist
    /// immediately; the transaction is marked aborted instead.
    fn ensure_open(&self, state: &mut TxState) -> Result<(), Error> {
        let aborted = match state {
            TxState::Active { conn, .. } => conn.is_autocommit(),
            TxState::Aborted => return Err(Error::TxAborted),
            TxState::Committed | TxState::RolledBack => return Err(Error::TxDone),
        };
        if aborted {
            *state = TxState::Aborted;
            tracing::debug!(tx = self.inner.id, "transaction rolled back by the database");
            return Err(Error::TxAborted);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, TxState> {
        // A panic inside a query closure poisons the lock; the state itself is
        // still consistent and the rollback has to run regardless.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn savepoint_name(depth: u32) -> String {
    format!("easylite_sp_{depth}")
}
