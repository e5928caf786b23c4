//! The [`Context`] chain and its cancellation handles.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ContextError;

/// An immutable, cheaply clonable, request-scoped carrier of cancellation,
/// deadline, and typed values.
///
/// Every `with_*` method returns a new child; the receiver is never changed.
/// Lookups walk from the child towards the root, so the innermost value for
/// a given key wins and cancellation of any ancestor is observed by every
/// descendant.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

struct Node {
    parent: Option<Arc<Node>>,
    kind: Kind,
}

enum Kind {
    Background,
    Cancel {
        flag: Arc<AtomicBool>,
        deadline: Option<Instant>,
    },
    Value {
        key: TypeId,
        value: Box<dyn Any + Send + Sync>,
    },
}

impl Context {
    /// Returns an empty root context: never cancelled, no deadline, no values.
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node {
                parent: None,
                kind: Kind::Background,
            }),
        }
    }

    /// Derives a child that is done once `handle.cancel()` is called or any
    /// ancestor is done.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.derive_cancel(None)
    }

    /// Derives a child that is done at `deadline`, when the returned handle is
    /// cancelled, or when any ancestor is done.
    ///
    /// A deadline later than one already in the chain has no effect: the
    /// earliest deadline always applies.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        self.derive_cancel(Some(deadline))
    }

    /// Shorthand for [`with_deadline`](Self::with_deadline) at `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.derive_cancel(Some(Instant::now() + timeout))
    }

    /// Derives a child whose lookups for key type `K` resolve to `value`.
    pub fn with_value<K, V>(&self, value: V) -> Self
    where
        K: 'static,
        V: Any + Send + Sync,
    {
        self.derive(Kind::Value {
            key: TypeId::of::<K>(),
            value: Box::new(value),
        })
    }

    /// Looks up the innermost value stored under key type `K`.
    ///
    /// Returns `None` both when no value was ever stored under `K` and when
    /// the innermost value under `K` is not a `V`.
    pub fn value<K, V>(&self) -> Option<&V>
    where
        K: 'static,
        V: Any,
    {
        let wanted = TypeId::of::<K>();
        self.chain().find_map(|node| match &node.kind {
            Kind::Value { key, value } if *key == wanted => Some(value.downcast_ref::<V>()),
            _ => None,
        })?
    }

    /// The earliest deadline anywhere in the chain.
    pub fn deadline(&self) -> Option<Instant> {
        self.chain()
            .filter_map(|node| match node.kind {
                Kind::Cancel { deadline, .. } => deadline,
                _ => None,
            })
            .min()
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        let now = Instant::now();
        self.chain().find_map(|node| match &node.kind {
            Kind::Cancel { flag, deadline } => {
                if flag.load(Ordering::Acquire) {
                    Some(ContextError::Canceled)
                } else if deadline.is_some_and(|at| at <= now) {
                    Some(ContextError::DeadlineExceeded)
                } else {
                    None
                }
            }
            _ => None,
        })
    }

    /// `Ok(())` while the context is live, otherwise the reason it is done.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the context has been cancelled or has passed its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Whether the context can ever become done.
    ///
    /// Background contexts and pure value derivations of them cannot.
    pub fn is_cancellable(&self) -> bool {
        self.chain()
            .any(|node| matches!(node.kind, Kind::Cancel { .. }))
    }

    /// Captures the cancellation state of the whole chain in an owned value.
    ///
    /// The probe shares the live cancellation flags, so it keeps observing
    /// cancellation after it is taken. It holds no context values, which
    /// makes it suitable for `'static` driver callbacks.
    pub fn done_probe(&self) -> DoneProbe {
        let mut flags = Vec::new();
        for node in self.chain() {
            if let Kind::Cancel { flag, .. } = &node.kind {
                flags.push(Arc::clone(flag));
            }
        }
        DoneProbe {
            flags,
            deadline: self.deadline(),
        }
    }

    fn derive_cancel(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let child = self.derive(Kind::Cancel {
            flag: Arc::clone(&flag),
            deadline,
        });
        (child, CancelHandle { flag })
    }

    fn derive(&self, kind: Kind) -> Self {
        Self {
            node: Arc::new(Node {
                parent: Some(Arc::clone(&self.node)),
                kind,
            }),
        }
    }

    fn chain(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(Some(&*self.node), |node| node.parent.as_deref())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

/// Cancels the context it was returned with, and every descendant of it.
///
/// Dropping the handle does not cancel anything.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Marks the associated context as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// An owned snapshot of a context chain's cancellation sources.
#[derive(Debug, Clone)]
pub struct DoneProbe {
    flags: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl DoneProbe {
    /// Same contract as [`Context::err`].
    pub fn err(&self) -> Option<ContextError> {
        if self.flags.iter().any(|flag| flag.load(Ordering::Acquire)) {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(at) if at <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Same contract as [`Context::is_done`].
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}
