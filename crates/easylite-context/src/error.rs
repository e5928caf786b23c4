//! Error types for context cancellation.

/// The reason a [`Context`](crate::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The earliest deadline in the context chain has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
