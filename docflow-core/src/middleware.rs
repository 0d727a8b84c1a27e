//! Process-wide middleware chain.
//!
//! Middleware sees every intercepted operation of every collection, before and after the store
//! call, wrapping record hooks:
//!
//! ```text
//! before-middleware -> before-hook -> store -> after-hook -> after-middleware
//! ```
//!
//! Registration appends to a single list and should be completed during start-up, before
//! operations run concurrently. Operations traverse a snapshot of the list taken when they start,
//! so a registration racing with an operation is either fully seen or not seen at all.
//!
//! ```ignore
//! middleware::register(middleware::from_fn(|ctx, subject, op, _opts| {
//!     if op == OpType::BEFORE_INSERT && ctx.collection() == "audit" {
//!         return Err("audit is append-only through the importer".into());
//!     }
//!     Ok(())
//! }));
//! ```

use std::{
    fmt,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use bson::Document;
use parking_lot::RwLock;

use crate::{
    error::{BoxError, DocumentStoreError, DocumentStoreResult},
    op::{OpContext, OpOptions, OpType},
    pipeline::Pipeline,
    query::Expr,
    record::AnyRecord,
    update::Update,
};

static REGISTRY: LazyLock<RwLock<Arc<[Arc<dyn Middleware>]>>> =
    LazyLock::new(|| RwLock::new(Arc::from(Vec::new())));

/// What an intercepted operation acts on.
#[derive(Clone, Copy)]
pub enum Subject<'a> {
    /// A typed record being inserted, replaced or upserted.
    Record(&'a dyn AnyRecord),
    /// A filter selecting documents to read or remove.
    Filter(&'a Expr),
    /// An update expression and its filter.
    Update {
        filter: &'a Expr,
        update: &'a Update,
    },
    /// An aggregation pipeline.
    Pipeline(&'a Pipeline),
    /// Raw documents, as handed to the store after encoding.
    Documents(&'a [Document]),
}

impl fmt::Debug for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Record(record) => f.debug_tuple("Record").field(&record.record_type()).finish(),
            Subject::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
            Subject::Update { filter, update } => f
                .debug_struct("Update")
                .field("filter", filter)
                .field("update", update)
                .finish(),
            Subject::Pipeline(pipeline) => f.debug_tuple("Pipeline").field(pipeline).finish(),
            Subject::Documents(documents) => f.debug_tuple("Documents").field(&documents.len()).finish(),
        }
    }
}

/// An operation interceptor.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Called once per intercepted phase. Returning an error from a before-phase call aborts the
    /// operation; from an after-phase call it is reported once the store effect is in place.
    async fn call(
        &self,
        ctx: &OpContext,
        subject: &Subject<'_>,
        op_type: OpType,
        options: &OpOptions,
    ) -> Result<(), BoxError>;
}

/// Middleware backed by a synchronous closure. Built with [`from_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&OpContext, &Subject<'_>, OpType, &OpOptions) -> Result<(), BoxError> + Send + Sync,
{
    async fn call(
        &self,
        ctx: &OpContext,
        subject: &Subject<'_>,
        op_type: OpType,
        options: &OpOptions,
    ) -> Result<(), BoxError> {
        (self.f)(ctx, subject, op_type, options)
    }
}

/// Wraps a closure as [`Middleware`].
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&OpContext, &Subject<'_>, OpType, &OpOptions) -> Result<(), BoxError> + Send + Sync,
{
    FnMiddleware { f }
}

/// Appends `middleware` to the process-wide chain.
pub fn register(middleware: impl Middleware + 'static) {
    register_arc(Arc::new(middleware));
}

/// Appends an already shared middleware to the process-wide chain.
pub fn register_arc(middleware: Arc<dyn Middleware>) {
    let mut registry = REGISTRY.write();
    let mut entries = registry.iter().cloned().collect::<Vec<_>>();
    entries.push(middleware);
    *registry = Arc::from(entries);
}

/// Number of registered middleware.
pub fn registered() -> usize {
    REGISTRY.read().len()
}

fn snapshot() -> Arc<[Arc<dyn Middleware>]> {
    REGISTRY.read().clone()
}

/// Runs every registered middleware in registration order, stopping at the first failure.
pub(crate) async fn run(
    ctx: &OpContext,
    subject: &Subject<'_>,
    op_type: OpType,
    options: &OpOptions,
) -> DocumentStoreResult<()> {
    for middleware in snapshot().iter() {
        middleware
            .call(ctx, subject, op_type, options)
            .await
            .map_err(|source| DocumentStoreError::MiddlewareFailed { op_type, source })?;
    }

    Ok(())
}
