//! Carries the active transaction inside a [`Context`].
//!
//! The lookup key is a private type, so nothing outside this module can read,
//! replace, or collide with the association.

use easylite_context::Context;

use crate::tx::Tx;

struct TxKey;

/// Returns a child of `ctx` whose queries run on `tx`. `ctx` is unchanged.
pub(crate) fn attach(ctx: &Context, tx: Tx) -> Context {
    ctx.with_value::<TxKey, _>(tx)
}

/// The transaction attached to `ctx` or one of its ancestors, if any.
pub(crate) fn extract(ctx: &Context) -> Option<&Tx> {
    ctx.value::<TxKey, Tx>()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::pool::{create_pool, DbPool, Settings};

    fn memory_pool() -> DbPool {
        create_pool(Path::new(":memory:"), Settings::default()).expect("pool should build")
    }

    #[test]
    fn extract_without_attach_is_none() {
        let ctx = Context::background();
        assert!(extract(&ctx).is_none());

        let (ctx, _cancel) = ctx.with_cancel();
        assert!(extract(&ctx).is_none());
    }

    #[test]
    fn extract_returns_the_attached_transaction() {
        let pool = memory_pool();
        let ctx = Context::background();
        let tx = Tx::begin(&pool, &ctx).expect("begin should succeed");

        let tx_ctx = attach(&ctx, tx.clone());

        let found = extract(&tx_ctx).expect("transaction should be attached");
        assert!(found.same_as(&tx));
        assert_eq!(found.id(), tx.id());
        assert!(extract(&ctx).is_none(), "attach must not modify the parent");

        tx.rollback().expect("rollback should succeed");
    }

    #[test]
    fn extract_checks_ancestors() {
        let pool = memory_pool();
        let ctx = Context::background();
        let tx = Tx::begin(&pool, &ctx).expect("begin should succeed");

        let (child, _cancel) = attach(&ctx, tx.clone()).with_cancel();
        let child = child.with_value::<u8, _>(1_u8);

        let found = extract(&child).expect("ancestor transaction should be found");
        assert!(found.same_as(&tx));

        tx.rollback().expect("rollback should succeed");
    }

    #[test]
    fn innermost_attachment_wins() {
        let (outer_pool, inner_pool) = (memory_pool(), memory_pool());
        let ctx = Context::background();
        let outer = Tx::begin(&outer_pool, &ctx).expect("outer begin should succeed");
        let inner = Tx::begin(&inner_pool, &ctx).expect("inner begin should succeed");

        let outer_ctx = attach(&ctx, outer.clone());
        let inner_ctx = attach(&outer_ctx, inner.clone());

        let found = extract(&inner_ctx).expect("transaction should be attached");
        assert!(found.same_as(&inner));
        assert!(!found.same_as(&outer));
        assert!(extract(&outer_ctx)
            .expect("outer still attached")
            .same_as(&outer));

        inner.rollback().expect("rollback should succeed");
        outer.rollback().expect("rollback should succeed");
    }

    #[test]
    fn foreign_value_under_other_key_is_ignored() {
        struct LookalikeKey;
        let ctx = Context::background().with_value::<LookalikeKey, _>("not a transaction");
        assert!(extract(&ctx).is_none());
    }

    #[test]
    fn malformed_value_under_the_key_degrades_to_none() {
        let ctx = Context::background().with_value::<TxKey, _>(42_u64);
        assert!(extract(&ctx).is_none());
    }
}
