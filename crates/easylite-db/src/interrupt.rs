//! Cancellation of running statements.
//!
//! SQLite calls the progress handler every few virtual-machine instructions;
//! returning `true` from it aborts the statement with `SQLITE_INTERRUPT`.
//! The handler is installed for the duration of one call and removed again,
//! since pooled connections outlive the contexts that use them.

use easylite_context::Context;
use rusqlite::Connection;

use crate::error::Error;

/// Virtual-machine instructions between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Runs `f` against `conn` so that it stops early once `ctx` is done.
///
/// Fails with `Error::Context` without touching the connection if `ctx` is
/// already done, and turns an interrupted statement into the context's
/// cancellation reason.
pub(crate) fn observe<T>(
    ctx: &Context,
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    ctx.check()?;
    if !ctx.is_cancellable() {
        return f(conn);
    }

    let probe = ctx.done_probe();
    conn.progress_handler(PROGRESS_INTERVAL, Some(move || probe.is_done()));
    let _clear = ClearOnDrop(conn);

    f(conn).map_err(|err| match ctx.err() {
        Some(reason) if err.is_interrupt() => Error::Context(reason),
        _ => err,
    })
}

struct ClearOnDrop<'c>(&'c Connection);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.progress_handler(0, None::<fn() -> bool>);
    }
}
