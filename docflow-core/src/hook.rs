//! Record lifecycle hooks.
//!
//! A record type opts into hooks by implementing [`RecordHooks`] and returning `Some(self)` from
//! [`crate::record::Record::hooks`]. Every method defaults to `Ok(())`, so a type only overrides
//! the interception points it cares about.
//!
//! Before-hooks run after before-middleware and before anything reaches the store; a failure
//! aborts the operation with no store effect. After-hooks run once the store call succeeded; a
//! failure is reported to the caller but the store effect stays in place.
//!
//! Expression-based operations (update, remove, query) have no record value to ask, so their hooks
//! are passed on the call instead:
//!
//! ```ignore
//! collection
//!     .update_many(Filter::eq("age", 6), Update::new().set("age", 10))
//!     .hooks(Arc::new(AuditHooks))
//!     .await?;
//! ```

use async_trait::async_trait;

use crate::{
    error::{BoxError, DocumentStoreError, DocumentStoreResult},
    op::{OpContext, OpKind, OpType, HookPhase},
};

/// Lifecycle hooks around store operations.
#[async_trait]
pub trait RecordHooks: Send + Sync {
    async fn before_insert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_insert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_update(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_update(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_replace(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_replace(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_upsert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_upsert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_remove(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_remove(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_query(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_query(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Runs the hook of `hooks` matching `op_type`.
///
/// A missing capability (`None`) is a no-op. A failing hook is wrapped in
/// [`DocumentStoreError::HookFailed`] with its original error kept as the source.
pub async fn dispatch(
    hooks: Option<&dyn RecordHooks>,
    ctx: &OpContext,
    op_type: OpType,
) -> DocumentStoreResult<()> {
    let Some(hooks) = hooks else {
        return Ok(());
    };

    let outcome = match (op_type.phase(), op_type.kind()) {
        (HookPhase::Before, OpKind::Insert) => hooks.before_insert(ctx).await,
        (HookPhase::After, OpKind::Insert) => hooks.after_insert(ctx).await,
        (HookPhase::Before, OpKind::Update) => hooks.before_update(ctx).await,
        (HookPhase::After, OpKind::Update) => hooks.after_update(ctx).await,
        (HookPhase::Before, OpKind::Replace) => hooks.before_replace(ctx).await,
        (HookPhase::After, OpKind::Replace) => hooks.after_replace(ctx).await,
        (HookPhase::Before, OpKind::Upsert) => hooks.before_upsert(ctx).await,
        (HookPhase::After, OpKind::Upsert) => hooks.after_upsert(ctx).await,
        (HookPhase::Before, OpKind::Remove) => hooks.before_remove(ctx).await,
        (HookPhase::After, OpKind::Remove) => hooks.after_remove(ctx).await,
        (HookPhase::Before, OpKind::Query) => hooks.before_query(ctx).await,
        (HookPhase::After, OpKind::Query) => hooks.after_query(ctx).await,
    };

    outcome.map_err(|source| DocumentStoreError::HookFailed { op_type, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl RecordHooks for Counting {
        async fn before_insert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn after_remove(&self, _ctx: &OpContext) -> Result<(), BoxError> {
            Err("cannot remove".into())
        }
    }

    fn ctx(kind: OpKind) -> OpContext {
        OpContext::new("db", "coll", kind, false)
    }

    #[tokio::test]
    async fn dispatches_to_the_matching_method() {
        let hooks = Counting::default();

        dispatch(Some(&hooks), &ctx(OpKind::Insert), OpType::BEFORE_INSERT).await.unwrap();
        dispatch(Some(&hooks), &ctx(OpKind::Insert), OpType::AFTER_INSERT).await.unwrap();

        assert_eq!(hooks.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_keep_op_type_and_source() {
        let hooks = Counting::default();
        let err = dispatch(Some(&hooks), &ctx(OpKind::Remove), OpType::AFTER_REMOVE)
            .await
            .unwrap_err();

        match &err {
            DocumentStoreError::HookFailed { op_type, source } => {
                assert_eq!(*op_type, OpType::AFTER_REMOVE);
                assert_eq!(source.to_string(), "cannot remove");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!err.is_before_phase());
    }

    #[tokio::test]
    async fn missing_capability_is_a_no_op() {
        assert!(dispatch(None, &ctx(OpKind::Query), OpType::BEFORE_QUERY).await.is_ok());
    }
}
