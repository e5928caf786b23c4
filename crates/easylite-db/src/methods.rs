//! Query helpers that follow the context's ambient transaction.
//!
//! Every helper takes the caller's [`Context`] first. If a transaction is
//! attached to it the statement runs on that transaction's connection;
//! otherwise a connection is checked out from the pool for the call. Errors
//! from the driver are returned untouched.

use easylite_context::Context;
use rusqlite::{Connection, Params, Row, Rows, Statement};

use crate::error::Error;
use crate::interrupt;
use crate::row::FromRow;
use crate::txctx;
use crate::Db;

/// What a data-changing statement reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated, or deleted by the statement.
    pub rows_affected: usize,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_rowid: i64,
}

impl Db {
    /// Executes a single statement and reports the rows it changed.
    ///
    /// # Errors
    ///
    /// Returns the driver error, `Error::Context` if `ctx` is done, or
    /// `Error::Pool` if no connection is available.
    pub fn exec<P: Params>(&self, ctx: &Context, sql: &str, params: P) -> Result<ExecResult, Error> {
        self.with_conn(ctx, |conn| {
            let rows_affected = conn.execute(sql, params)?;
            Ok(ExecResult {
                rows_affected,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }

    /// Like [`exec`](Self::exec), but panics instead of returning an error.
    ///
    /// Intended for setup code such as seeding fixtures, where a failure
    /// means the program cannot continue. Do not use it on request-serving
    /// paths: a failing statement unwinds (or aborts, under
    /// `panic = "abort"`) the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if [`exec`](Self::exec) returns an error.
    pub fn must_exec<P: Params>(&self, ctx: &Context, sql: &str, params: P) -> ExecResult {
        match self.exec(ctx, sql, params) {
            Ok(result) => result,
            Err(err) => panic!("must_exec failed for `{sql}`: {err}"),
        }
    }

    /// Fetches exactly one row.
    ///
    /// # Errors
    ///
    /// Returns `rusqlite::Error::QueryReturnedNoRows` (as `Error::Sqlite`)
    /// when nothing matches and `Error::MultipleRows` when more than one row
    /// does, besides the errors of [`exec`](Self::exec).
    pub fn get<T: FromRow, P: Params>(&self, ctx: &Context, sql: &str, params: P) -> Result<T, Error> {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let mut rows = stmt.query(params)?;
            let value = match rows.next()? {
                Some(row) => T::from_row(row)?,
                None => return Err(rusqlite::Error::QueryReturnedNoRows.into()),
            };
            if rows.next()?.is_some() {
                return Err(Error::MultipleRows);
            }
            Ok(value)
        })
    }

    /// Fetches every matching row, in result order.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](Self::exec). An empty result is not an error.
    pub fn select<T: FromRow, P: Params>(
        &self,
        ctx: &Context,
        sql: &str,
        params: P,
    ) -> Result<Vec<T>, Error> {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let values = stmt
                .query_map(params, |row| T::from_row(row))?
                .collect::<rusqlite::Result<Vec<T>>>()?;
            Ok(values)
        })
    }

    /// Prepares `sql` and hands the statement to `f`.
    ///
    /// The statement borrows the connection, so it only lives for the
    /// duration of `f`. Inside a transaction, `f` must not call back into the
    /// handle with the same context.
    ///
    /// # Errors
    ///
    /// Returns preparation errors, the errors of [`exec`](Self::exec), and
    /// whatever `f` returns.
    pub fn prepare<T, F>(&self, ctx: &Context, sql: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Statement<'_>) -> Result<T, Error>,
    {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            f(&mut stmt)
        })
    }

    /// Runs a query and hands the raw row cursor to `f`.
    ///
    /// Inside a transaction, `f` must not call back into the handle with the
    /// same context.
    ///
    /// # Errors
    ///
    /// Same as [`prepare`](Self::prepare).
    pub fn query<T, P, F>(&self, ctx: &Context, sql: &str, params: P, f: F) -> Result<T, Error>
    where
        P: Params,
        F: FnOnce(Rows<'_>) -> Result<T, Error>,
    {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query(params)?;
            f(rows)
        })
    }

    /// Runs a query and maps its first row with `f`; further rows are ignored.
    ///
    /// Preparation, execution, an empty result
    /// (`rusqlite::Error::QueryReturnedNoRows`), and mapping failures all
    /// surface together when the row is mapped.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](Self::exec), plus whatever `f` returns.
    pub fn query_row<T, P, F>(&self, ctx: &Context, sql: &str, params: P, f: F) -> Result<T, Error>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(ctx, |conn| Ok(conn.query_row(sql, params, f)?))
    }

    /// Routes `f` to the context's transaction, or to a pooled connection when
    /// there is none.
    fn with_conn<T>(
        &self,
        ctx: &Context,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if let Some(tx) = txctx::extract(ctx) {
            return tx.with_conn(|conn| interrupt::observe(ctx, conn, f));
        }

        ctx.check()?;
        let conn = self.pool.get()?;
        interrupt::observe(ctx, &conn, f)
    }
}
