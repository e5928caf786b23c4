//! The transaction coordinator.

use easylite_context::Context;

use crate::error::Error;
use crate::tx::Tx;
use crate::txctx;
use crate::Db;

impl Db {
    /// Runs `f` inside a transaction and commits if it succeeds.
    ///
    /// `f` receives a context derived from `ctx` that carries the
    /// transaction; every helper called with that context (or anything
    /// derived from it) runs inside the transaction. The transaction is
    /// serializable and takes SQLite's write lock up front
    /// (`BEGIN IMMEDIATE`).
    ///
    /// When `f` returns an error or panics, everything it wrote is rolled
    /// back and its error is returned unchanged. Infrastructure failures are
    /// labelled: [`Error::Begin`] if the transaction could not start (then
    /// `f` never runs) and [`Error::Commit`] if it could not be committed.
    ///
    /// If `ctx` already carries a transaction, `f` runs in a savepoint of
    /// that transaction instead of a new one: its writes are undone on
    /// failure, and become permanent only when the outer transaction commits.
    ///
    /// No timeout is applied here; give `ctx` a deadline to bound how long
    /// the transaction may stay open.
    ///
    /// ```rust,no_run
    /// # use easylite_context::Context;
    /// # use easylite_db::{Db, Error};
    /// # fn demo(db: &Db) -> Result<(), Error> {
    /// let ctx = Context::background();
    /// db.run_in_transaction(&ctx, |ctx| {
    ///     db.exec(ctx, "UPDATE users SET balance = balance - 200 WHERE id = ?1", [100])?;
    ///     db.exec(ctx, "UPDATE users SET balance = balance + 200 WHERE id = ?1", [101])?;
    ///     Ok::<_, Error>(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// The error returned by `f`, or [`Error::Begin`] / [`Error::Commit`]
    /// converted into `E`.
    pub fn run_in_transaction<T, E, F>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
        E: From<Error>,
    {
        if let Some(tx) = txctx::extract(ctx) {
            return run_in_savepoint(tx, ctx, f);
        }

        let tx = Tx::begin(&self.pool, ctx).map_err(|err| E::from(Error::Begin(Box::new(err))))?;
        let _rollback = RollbackGuard {
            tx: &tx,
            scope: Scope::Transaction,
        };

        let tx_ctx = txctx::attach(ctx, tx.clone());
        let value = f(&tx_ctx)?;

        tx.commit(&tx_ctx)
            .map_err(|err| E::from(Error::Commit(Box::new(err))))?;
        Ok(value)
    }
}

fn run_in_savepoint<T, E, F>(tx: &Tx, ctx: &Context, f: F) -> Result<T, E>
where
    F: FnOnce(&Context) -> Result<T, E>,
    E: From<Error>,
{
    let depth = tx
        .savepoint(ctx)
        .map_err(|err| E::from(Error::Begin(Box::new(err))))?;
    let mut guard = RollbackGuard {
        tx,
        scope: Scope::Savepoint { depth, released: false },
    };

    let value = f(ctx)?;

    tx.release(ctx, depth)
        .map_err(|err| E::from(Error::Commit(Box::new(err))))?;
    guard.scope = Scope::Savepoint { depth, released: true };
    Ok(value)
}

enum Scope {
    Transaction,
    Savepoint { depth: u32, released: bool },
}

/// Rolls back on every exit path, including unwinding out of the callback.
///
/// For a whole transaction the rollback is attempted unconditionally; after
/// a commit it finds nothing to do.
struct RollbackGuard<'a> {
    tx: &'a Tx,
    scope: Scope,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        let id = self.tx.id();
        match self.scope {
            Scope::Transaction => match self.tx.rollback() {
                Ok(true) => tracing::debug!(tx = id, "transaction rolled back"),
                Ok(false) => tracing::trace!(tx = id, "transaction already finished"),
                Err(err) => tracing::warn!(tx = id, error = %err, "transaction rollback failed"),
            },
            Scope::Savepoint { released: true, .. } => {}
            Scope::Savepoint { depth, released: false } => match self.tx.rollback_to(depth) {
                Ok(true) => tracing::debug!(tx = id, depth, "savepoint rolled back"),
                Ok(false) => tracing::trace!(tx = id, depth, "savepoint already gone"),
                Err(err) => {
                    tracing::warn!(tx = id, depth, error = %err, "savepoint rollback failed")
                }
            },
        }
    }
}
