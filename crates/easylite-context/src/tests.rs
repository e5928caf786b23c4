use std::time::{Duration, Instant};

use crate::{Context, ContextError};

struct RequestId;
struct Other;

#[test]
fn background_is_never_done() {
    let ctx = Context::background();
    assert!(ctx.err().is_none());
    assert!(ctx.deadline().is_none());
    assert!(!ctx.is_cancellable());
    assert!(ctx.check().is_ok());
}

#[test]
fn cancel_reaches_descendants_but_not_parent() {
    let root = Context::background();
    let (parent, cancel) = root.with_cancel();
    let child = parent.with_value::<RequestId, _>(7_u32);
    let (grandchild, _unused) = child.with_cancel();

    cancel.cancel();

    assert_eq!(parent.err(), Some(ContextError::Canceled));
    assert_eq!(child.err(), Some(ContextError::Canceled));
    assert_eq!(grandchild.err(), Some(ContextError::Canceled));
    assert!(root.err().is_none());
    assert!(cancel.is_cancelled());
}

#[test]
fn child_cancel_leaves_parent_live() {
    let (parent, _parent_cancel) = Context::background().with_cancel();
    let (child, child_cancel) = parent.with_cancel();

    child_cancel.cancel();
    child_cancel.cancel();

    assert!(child.is_done());
    assert!(!parent.is_done());
}

#[test]
fn elapsed_deadline_reports_deadline_exceeded() {
    let (ctx, _cancel) = Context::background().with_deadline(Instant::now());
    assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
}

#[test]
fn earliest_deadline_wins() {
    let soon = Instant::now() + Duration::from_secs(1);
    let later = soon + Duration::from_secs(60);

    let (outer, _a) = Context::background().with_deadline(soon);
    let (inner, _b) = outer.with_deadline(later);

    assert_eq!(inner.deadline(), Some(soon));
    assert!(inner.err().is_none());
}

#[test]
fn explicit_cancel_beats_pending_deadline() {
    let (ctx, cancel) = Context::background().with_timeout(Duration::from_secs(60));
    cancel.cancel();
    assert_eq!(ctx.err(), Some(ContextError::Canceled));
}

#[test]
fn missing_value_is_none() {
    let ctx = Context::background();
    assert!(ctx.value::<RequestId, u32>().is_none());
}

#[test]
fn value_lookup_checks_ancestors() {
    let ctx = Context::background().with_value::<RequestId, _>(42_u32);
    let (child, _cancel) = ctx.with_cancel();
    let child = child.with_value::<Other, _>("unrelated");

    assert_eq!(child.value::<RequestId, u32>(), Some(&42));
    assert_eq!(child.value::<Other, &str>(), Some(&"unrelated"));
}

#[test]
fn innermost_value_wins() {
    let outer = Context::background().with_value::<RequestId, _>(1_u32);
    let inner = outer.with_value::<RequestId, _>(2_u32);

    assert_eq!(inner.value::<RequestId, u32>(), Some(&2));
    assert_eq!(outer.value::<RequestId, u32>(), Some(&1));
}

#[test]
fn wrong_value_type_degrades_to_none() {
    let ctx = Context::background().with_value::<RequestId, _>("not a number".to_string());
    assert!(ctx.value::<RequestId, u32>().is_none());
}

#[test]
fn done_probe_tracks_later_cancellation() {
    let (ctx, cancel) = Context::background().with_cancel();
    let probe = ctx.with_value::<RequestId, _>(1_u32).done_probe();

    assert!(!probe.is_done());
    cancel.cancel();
    assert_eq!(probe.err(), Some(ContextError::Canceled));
}

#[test]
fn done_probe_observes_deadline() {
    let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(10));
    let probe = ctx.done_probe();

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(probe.err(), Some(ContextError::DeadlineExceeded));
    assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
}

#[test]
fn contexts_cross_threads() {
    let (ctx, cancel) = Context::background().with_cancel();
    let ctx = ctx.with_value::<RequestId, _>(9_u64);

    let handle = std::thread::spawn(move || {
        while !ctx.is_done() {
            std::thread::yield_now();
        }
        ctx.value::<RequestId, u64>().copied()
    });

    cancel.cancel();
    let seen = handle.join().expect("worker should not panic");
    assert_eq!(seen, Some(9));
}
