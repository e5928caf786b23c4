//! Request-scoped contexts for the easylite database layer.
//!
//! A [`Context`] travels explicitly through a call chain and carries three
//! things: a cancellation signal, an optional deadline, and a small bag of
//! typed values. Contexts are immutable. New behaviour is added by deriving
//! a child context, which inherits the cancellation state, deadline, and
//! values of every ancestor.
//!
//! ```rust
//! use std::time::Duration;
//! use easylite_context::Context;
//!
//! let root = Context::background();
//! let (ctx, cancel) = root.with_timeout(Duration::from_secs(5));
//! assert!(ctx.err().is_none());
//!
//! cancel.cancel();
//! assert!(ctx.is_done());
//! assert!(!root.is_done(), "cancelling a child never reaches the parent");
//! ```
//!
//! # Values
//!
//! Values are keyed by a marker *type* rather than a runtime value. A crate
//! that keeps its marker type private owns that slot outright: no other
//! code can read or overwrite it.

mod context;
mod error;

pub use context::{CancelHandle, Context, DoneProbe};
pub use error::ContextError;

#[cfg(test)]
mod tests;
