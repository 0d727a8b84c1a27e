//! Collection handles and their operations.
//!
//! A [`Collection`] either leases a pooled session per call or, when obtained from a
//! [`Transaction`], runs every call on the transaction's session.
//!
//! Every record-bearing write runs through the same pipeline:
//!
//! ```text
//! before-middleware -> before-hook -> validate -> encode + inject fields
//!     -> store -> after-hook -> after-middleware
//! ```
//!
//! Expression operations (update, remove, find, aggregate) skip validation and encoding, and take
//! their hooks from `.hooks(..)` on the call.
//!
//! Builders implement [`IntoFuture`], so options are chained before awaiting:
//!
//! ```ignore
//! let result = users
//!     .update_many(Filter::all(), Update::new().set("age", 10))
//!     .upsert(false)
//!     .await?;
//! assert_eq!(result.matched_count, total);
//! ```
//!
//! Dropping an operation future cancels it. A store call that was already in flight may or may
//! not have taken effect.

use std::{
    any::Any,
    future::{Future, IntoFuture},
    ops::AsyncFnOnce,
    sync::Arc,
    time::Duration,
};

use bson::{Bson, Document};
use futures::future::BoxFuture;
use mea::mutex::{Mutex, MutexGuard};
use tracing::debug;

use crate::{
    backend::{DeleteResult, Namespace, StoreConnection, UpdateResult},
    error::{DocumentStoreError, DocumentStoreResult},
    field::{FieldSpec, InjectMode, inject},
    hook::{self, RecordHooks},
    middleware::{self, Subject},
    op::{HookPhase, OpContext, OpKind, OpOptions, OpType},
    pipeline::Pipeline,
    pool::{ConnectionManager, Session},
    query::{Expr, Filter, FindSpec, Projection, SortDirection},
    record::{Record, RecordExt},
    transaction::{self, Transaction},
    update::Update,
};

/// Result of [`Collection::insert_one`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Bson,
}

/// Result of [`Collection::insert_many`]. Identifiers are in the order the records were given.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Bson>,
}

/// Settings of an update call, readable by middleware through [`OpOptions::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSettings {
    pub multi: bool,
    pub upsert: bool,
}

#[derive(Clone)]
enum SessionSource<'s> {
    Pool(Arc<ConnectionManager>),
    Bound(&'s Mutex<Session>),
}

enum Lease<'s> {
    Pooled(Session),
    Bound(MutexGuard<'s, Session>),
}

impl Lease<'_> {
    fn connection(&mut self) -> DocumentStoreResult<&mut Box<dyn StoreConnection>> {
        match self {
            Lease::Pooled(session) => session.connection(),
            Lease::Bound(session) => session.connection(),
        }
    }
}

/// A handle to one collection.
#[derive(Clone)]
pub struct Collection<'s> {
    ns: Namespace,
    source: SessionSource<'s>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.ns)
            .field("in_transaction", &self.in_transaction())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Collection<'static> {
    pub(crate) fn pooled(ns: Namespace, pool: Arc<ConnectionManager>) -> Self {
        Self { ns, source: SessionSource::Pool(pool), timeout: None }
    }
}

impl<'s> Collection<'s> {
    pub(crate) fn bound(ns: Namespace, session: &'s Mutex<Session>, timeout: Option<Duration>) -> Self {
        Self { ns, source: SessionSource::Bound(session), timeout }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.ns.collection
    }

    pub fn database_name(&self) -> &str {
        &self.ns.database
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Returns `true` when operations run inside a transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self.source, SessionSource::Bound(_))
    }

    /// Returns a handle whose operations fail with [`DocumentStoreError::Timeout`] when they take
    /// longer than `timeout`, pool wait included.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..self.clone() }
    }

    /// Inserts one record, generating its identifier and timestamps as needed.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if any stage of the write pipeline fails. Errors from the
    /// after-phase are returned with the document already stored.
    pub fn insert_one<'a, R: Record>(&'a self, record: &'a R) -> InsertOne<'a, 's, R> {
        InsertOne { collection: self, record, options: OpOptions::new() }
    }

    /// Inserts records in one store call. Every record passes the before-phase before anything is
    /// stored.
    pub fn insert_many<'a, R: Record>(&'a self, records: &'a [R]) -> InsertMany<'a, 's, R> {
        InsertMany { collection: self, records, options: OpOptions::new() }
    }

    /// Starts a find. Choose the result shape with a terminal: `one`, `all`, `documents` or
    /// `count`.
    pub fn find(&self, filter: Expr) -> Find<'_, 's> {
        Find {
            collection: self,
            spec: FindSpec::new(filter),
            hooks: None,
            options: OpOptions::new(),
        }
    }

    /// Counts documents matching `filter`.
    pub async fn count(&self, filter: Expr) -> DocumentStoreResult<u64> {
        self.find(filter).count().await
    }

    /// Applies `update` to the first matching document.
    pub fn update_one(&self, filter: Expr, update: Update) -> UpdateAction<'_, 's> {
        UpdateAction::new(self, filter, update, false)
    }

    /// Applies `update` to every matching document.
    pub fn update_many(&self, filter: Expr, update: Update) -> UpdateAction<'_, 's> {
        UpdateAction::new(self, filter, update, true)
    }

    /// Replaces the first matching document with `record`. Only the update-time field is
    /// refreshed.
    pub fn replace_one<'a, R: Record>(&'a self, filter: Expr, record: &'a R) -> ReplaceOne<'a, 's, R> {
        ReplaceOne { collection: self, filter, record, upsert: false, options: OpOptions::new() }
    }

    /// Replaces the first matching document with `record`, or inserts it if nothing matches.
    pub fn upsert<'a, R: Record>(&'a self, filter: Expr, record: &'a R) -> ReplaceOne<'a, 's, R> {
        ReplaceOne { collection: self, filter, record, upsert: true, options: OpOptions::new() }
    }

    /// Removes the first matching document. Fails with [`DocumentStoreError::DocumentNotFound`]
    /// when nothing matches.
    pub fn remove_one(&self, filter: Expr) -> Remove<'_, 's> {
        Remove::new(self, filter, false)
    }

    /// Removes every matching document.
    pub fn remove_many(&self, filter: Expr) -> Remove<'_, 's> {
        Remove::new(self, filter, true)
    }

    /// Removes the document with the given `_id`.
    pub fn remove_id(&self, id: impl Into<Bson>) -> Remove<'_, 's> {
        Remove::new(self, Filter::id(id), false)
    }

    /// Runs an aggregation pipeline.
    pub fn aggregate(&self, pipeline: Pipeline) -> Aggregate<'_, 's> {
        Aggregate {
            collection: self,
            pipeline,
            hooks: None,
            options: OpOptions::new(),
        }
    }

    /// Runs `unit` inside a transaction on this collection's database.
    ///
    /// See [`crate::transaction`] for commit and abort semantics.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Unsupported`] when called on a collection that is already
    /// bound to a transaction.
    pub async fn do_transaction<T, F>(&self, unit: F) -> DocumentStoreResult<T>
    where
        F: AsyncFnOnce(&Transaction) -> DocumentStoreResult<T>,
    {
        match &self.source {
            SessionSource::Pool(pool) => {
                transaction::run(pool, &self.ns.database, self.timeout, unit).await
            }
            SessionSource::Bound(_) => Err(DocumentStoreError::Unsupported(
                "nested transactions are not supported".to_string(),
            )),
        }
    }

    fn context(&self, kind: OpKind) -> OpContext {
        OpContext::new(&self.ns.database, &self.ns.collection, kind, self.in_transaction())
    }

    async fn lease(&self) -> DocumentStoreResult<Lease<'s>> {
        match &self.source {
            SessionSource::Pool(pool) => Ok(Lease::Pooled(pool.acquire().await?)),
            SessionSource::Bound(session) => Ok(Lease::Bound(session.lock().await)),
        }
    }

    async fn deadline<T>(
        &self,
        operation: impl Future<Output = DocumentStoreResult<T>>,
    ) -> DocumentStoreResult<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| DocumentStoreError::Timeout(limit))?,
            None => operation.await,
        }
    }

    async fn before(
        &self,
        ctx: &OpContext,
        subject: &Subject<'_>,
        hooks: Option<&dyn RecordHooks>,
        options: &OpOptions,
    ) -> DocumentStoreResult<()> {
        let op_type = OpType::new(HookPhase::Before, ctx.kind());
        middleware::run(ctx, subject, op_type, options).await?;
        hook::dispatch(hooks, ctx, op_type).await
    }

    async fn after(
        &self,
        ctx: &OpContext,
        subject: &Subject<'_>,
        hooks: Option<&dyn RecordHooks>,
        options: &OpOptions,
    ) -> DocumentStoreResult<()> {
        let op_type = OpType::new(HookPhase::After, ctx.kind());
        hook::dispatch(hooks, ctx, op_type).await?;
        middleware::run(ctx, subject, op_type, options).await
    }

    /// Runs the before-phase for a record and returns its injected document.
    async fn prepare<R: Record>(
        &self,
        ctx: &OpContext,
        record: &R,
        options: &OpOptions,
        mode: InjectMode,
    ) -> DocumentStoreResult<Document> {
        self.before(ctx, &Subject::Record(record), record.hooks(), options).await?;
        record.validate()?;

        let mut document = record.to_document()?;
        let spec = FieldSpec::of::<R>()?;
        inject(&mut document, &spec, mode)?;

        Ok(document)
    }
}

/// Builder returned by [`Collection::insert_one`].
pub struct InsertOne<'a, 's, R: Record> {
    collection: &'a Collection<'s>,
    record: &'a R,
    options: OpOptions,
}

impl<'a, 's, R: Record> InsertOne<'a, 's, R> {
    /// Attaches an operation option visible to middleware.
    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    async fn execute(self) -> DocumentStoreResult<InsertOneResult> {
        let collection = self.collection;
        let ctx = collection.context(OpKind::Insert);

        let document = collection
            .prepare(&ctx, self.record, &self.options, InjectMode::Insert)
            .await?;

        let ids = {
            let mut lease = collection.lease().await?;
            lease.connection()?.insert(&collection.ns, vec![document]).await?
        };
        let inserted_id = ids.into_iter().next().unwrap_or(Bson::Null);
        debug!(target: "docflow::collection", ns = %collection.ns, id = %inserted_id, "inserted one");

        collection
            .after(&ctx, &Subject::Record(self.record), self.record.hooks(), &self.options)
            .await?;

        Ok(InsertOneResult { inserted_id })
    }
}

impl<'a, 's, R: Record> IntoFuture for InsertOne<'a, 's, R> {
    type Output = DocumentStoreResult<InsertOneResult>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let collection = self.collection;
            collection.deadline(self.execute()).await
        })
    }
}

/// Builder returned by [`Collection::insert_many`].
pub struct InsertMany<'a, 's, R: Record> {
    collection: &'a Collection<'s>,
    records: &'a [R],
    options: OpOptions,
}

impl<'a, 's, R: Record> InsertMany<'a, 's, R> {
    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    async fn execute(self) -> DocumentStoreResult<InsertManyResult> {
        let collection = self.collection;
        if self.records.is_empty() {
            return Ok(InsertManyResult { inserted_ids: Vec::new() });
        }

        let ctx = collection.context(OpKind::Insert);
        let mut documents = Vec::with_capacity(self.records.len());
        for record in self.records {
            documents.push(
                collection
                    .prepare(&ctx, record, &self.options, InjectMode::Insert)
                    .await?,
            );
        }

        let inserted_ids = {
            let mut lease = collection.lease().await?;
            lease.connection()?.insert(&collection.ns, documents).await?
        };
        debug!(target: "docflow::collection", ns = %collection.ns, count = inserted_ids.len(), "inserted many");

        for record in self.records {
            collection
                .after(&ctx, &Subject::Record(record), record.hooks(), &self.options)
                .await?;
        }

        Ok(InsertManyResult { inserted_ids })
    }
}

impl<'a, 's, R: Record> IntoFuture for InsertMany<'a, 's, R> {
    type Output = DocumentStoreResult<InsertManyResult>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let collection = self.collection;
            collection.deadline(self.execute()).await
        })
    }
}

/// Builder returned by [`Collection::find`].
pub struct Find<'a, 's> {
    collection: &'a Collection<'s>,
    spec: FindSpec,
    hooks: Option<Arc<dyn RecordHooks>>,
    options: OpOptions,
}

impl<'a, 's> Find<'a, 's> {
    /// Adds a sort key. Keys apply in the order they are added.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.spec = self.spec.sort(field, direction);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.spec.skip = Some(skip);
        self
    }

    /// `0` returns every matching document.
    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.spec.projection = Some(projection);
        self
    }

    /// Query hooks to run around the read.
    pub fn hooks(mut self, hooks: Arc<dyn RecordHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    /// Returns the first matching document decoded as `R`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] when nothing matches.
    pub async fn one<R: Record>(mut self) -> DocumentStoreResult<R> {
        self.spec.limit = Some(1);
        let ns = self.collection.ns.to_string();

        self.documents()
            .await?
            .into_iter()
            .next()
            .ok_or(DocumentStoreError::DocumentNotFound(ns))
            .and_then(R::from_document)
    }

    /// Returns every matching document decoded as `R`.
    pub async fn all<R: Record>(self) -> DocumentStoreResult<Vec<R>> {
        self.documents()
            .await?
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    /// Returns every matching document as is.
    pub async fn documents(self) -> DocumentStoreResult<Vec<Document>> {
        let collection = self.collection;
        collection.deadline(self.read()).await
    }

    /// Counts matching documents, honouring `skip` and `limit`.
    pub async fn count(self) -> DocumentStoreResult<u64> {
        let collection = self.collection;
        collection.deadline(self.count_matching()).await
    }

    async fn read(self) -> DocumentStoreResult<Vec<Document>> {
        let collection = self.collection;
        let ctx = collection.context(OpKind::Query);
        let subject = Subject::Filter(&self.spec.filter);
        let hooks = self.hooks.as_deref();

        collection.before(&ctx, &subject, hooks, &self.options).await?;

        let documents = {
            let mut lease = collection.lease().await?;
            lease.connection()?.find(&collection.ns, &self.spec).await?
        };
        debug!(target: "docflow::collection", ns = %collection.ns, count = documents.len(), "found");

        collection.after(&ctx, &subject, hooks, &self.options).await?;

        Ok(documents)
    }

    async fn count_matching(self) -> DocumentStoreResult<u64> {
        let collection = self.collection;
        let ctx = collection.context(OpKind::Query);
        let subject = Subject::Filter(&self.spec.filter);
        let hooks = self.hooks.as_deref();

        collection.before(&ctx, &subject, hooks, &self.options).await?;

        let matched = {
            let mut lease = collection.lease().await?;
            lease.connection()?.count(&collection.ns, &self.spec.filter).await?
        };

        collection.after(&ctx, &subject, hooks, &self.options).await?;

        let skipped = matched.saturating_sub(self.spec.skip.unwrap_or(0));
        Ok(self.spec.effective_limit().map_or(skipped, |limit| skipped.min(limit)))
    }
}

/// Builder returned by [`Collection::update_one`] and [`Collection::update_many`].
pub struct UpdateAction<'a, 's> {
    collection: &'a Collection<'s>,
    filter: Expr,
    update: Update,
    settings: UpdateSettings,
    hooks: Option<Arc<dyn RecordHooks>>,
    options: OpOptions,
}

impl<'a, 's> UpdateAction<'a, 's> {
    fn new(collection: &'a Collection<'s>, filter: Expr, update: Update, multi: bool) -> Self {
        Self {
            collection,
            filter,
            update,
            settings: UpdateSettings { multi, upsert: false },
            hooks: None,
            options: OpOptions::new(),
        }
    }

    /// Inserts a document built from the filter's equality terms when nothing matches.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.settings.upsert = upsert;
        self
    }

    /// Update hooks to run around the write.
    pub fn hooks(mut self, hooks: Arc<dyn RecordHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    async fn execute(mut self) -> DocumentStoreResult<UpdateResult> {
        let collection = self.collection;
        if self.update.is_empty() {
            return Err(DocumentStoreError::InvalidDocument(
                "update has no operators".to_string(),
            ));
        }
        self.options.insert(self.settings);

        let ctx = collection.context(OpKind::Update);
        let subject = Subject::Update { filter: &self.filter, update: &self.update };
        let hooks = self.hooks.as_deref();

        collection.before(&ctx, &subject, hooks, &self.options).await?;

        let result = {
            let mut lease = collection.lease().await?;
            lease
                .connection()?
                .update(
                    &collection.ns,
                    &self.filter,
                    &self.update,
                    self.settings.multi,
                    self.settings.upsert,
                )
                .await?
        };
        debug!(
            target: "docflow::collection",
            ns = %collection.ns,
            matched = result.matched_count,
            modified = result.modified_count,
            "updated"
        );

        collection.after(&ctx, &subject, hooks, &self.options).await?;

        Ok(result)
    }
}

impl<'a, 's> IntoFuture for UpdateAction<'a, 's> {
    type Output = DocumentStoreResult<UpdateResult>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let collection = self.collection;
            collection.deadline(self.execute()).await
        })
    }
}

/// Builder returned by [`Collection::replace_one`] and [`Collection::upsert`].
pub struct ReplaceOne<'a, 's, R: Record> {
    collection: &'a Collection<'s>,
    filter: Expr,
    record: &'a R,
    upsert: bool,
    options: OpOptions,
}

impl<'a, 's, R: Record> ReplaceOne<'a, 's, R> {
    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    async fn execute(self) -> DocumentStoreResult<UpdateResult> {
        let collection = self.collection;
        let (kind, mode) = if self.upsert {
            (OpKind::Upsert, InjectMode::Upsert)
        } else {
            (OpKind::Replace, InjectMode::Replace)
        };
        let ctx = collection.context(kind);

        let document = collection
            .prepare(&ctx, self.record, &self.options, mode)
            .await?;

        let result = {
            let mut lease = collection.lease().await?;
            lease
                .connection()?
                .replace(&collection.ns, &self.filter, document, self.upsert)
                .await?
        };
        debug!(
            target: "docflow::collection",
            ns = %collection.ns,
            matched = result.matched_count,
            upserted = result.upserted_id.is_some(),
            "replaced"
        );

        collection
            .after(&ctx, &Subject::Record(self.record), self.record.hooks(), &self.options)
            .await?;

        Ok(result)
    }
}

impl<'a, 's, R: Record> IntoFuture for ReplaceOne<'a, 's, R> {
    type Output = DocumentStoreResult<UpdateResult>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let collection = self.collection;
            collection.deadline(self.execute()).await
        })
    }
}

/// Builder returned by the `remove_*` methods.
pub struct Remove<'a, 's> {
    collection: &'a Collection<'s>,
    filter: Expr,
    multi: bool,
    hooks: Option<Arc<dyn RecordHooks>>,
    options: OpOptions,
}

impl<'a, 's> Remove<'a, 's> {
    fn new(collection: &'a Collection<'s>, filter: Expr, multi: bool) -> Self {
        Self { collection, filter, multi, hooks: None, options: OpOptions::new() }
    }

    /// Remove hooks to run around the write.
    pub fn hooks(mut self, hooks: Arc<dyn RecordHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    async fn execute(self) -> DocumentStoreResult<DeleteResult> {
        let collection = self.collection;
        let ctx = collection.context(OpKind::Remove);
        let subject = Subject::Filter(&self.filter);
        let hooks = self.hooks.as_deref();

        collection.before(&ctx, &subject, hooks, &self.options).await?;

        let result = {
            let mut lease = collection.lease().await?;
            lease
                .connection()?
                .delete(&collection.ns, &self.filter, self.multi)
                .await?
        };
        debug!(target: "docflow::collection", ns = %collection.ns, deleted = result.deleted_count, "removed");

        if !self.multi && result.deleted_count == 0 {
            return Err(DocumentStoreError::DocumentNotFound(collection.ns.to_string()));
        }

        collection.after(&ctx, &subject, hooks, &self.options).await?;

        Ok(result)
    }
}

impl<'a, 's> IntoFuture for Remove<'a, 's> {
    type Output = DocumentStoreResult<DeleteResult>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let collection = self.collection;
            collection.deadline(self.execute()).await
        })
    }
}

/// Builder returned by [`Collection::aggregate`].
pub struct Aggregate<'a, 's> {
    collection: &'a Collection<'s>,
    pipeline: Pipeline,
    hooks: Option<Arc<dyn RecordHooks>>,
    options: OpOptions,
}

impl<'a, 's> Aggregate<'a, 's> {
    /// Query hooks to run around the pipeline.
    pub fn hooks(mut self, hooks: Arc<dyn RecordHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn option<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    /// Returns the pipeline output as is.
    pub async fn documents(self) -> DocumentStoreResult<Vec<Document>> {
        let collection = self.collection;
        collection.deadline(self.run()).await
    }

    /// Returns the pipeline output decoded as `T`.
    pub async fn all<T: Record>(self) -> DocumentStoreResult<Vec<T>> {
        self.documents()
            .await?
            .into_iter()
            .map(T::from_document)
            .collect()
    }

    /// Returns the first output document decoded as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] when the pipeline produced nothing.
    pub async fn one<T: Record>(self) -> DocumentStoreResult<T> {
        let ns = self.collection.ns.to_string();

        self.documents()
            .await?
            .into_iter()
            .next()
            .ok_or(DocumentStoreError::DocumentNotFound(ns))
            .and_then(T::from_document)
    }

    async fn run(self) -> DocumentStoreResult<Vec<Document>> {
        let collection = self.collection;
        let ctx = collection.context(OpKind::Query);
        let subject = Subject::Pipeline(&self.pipeline);
        let hooks = self.hooks.as_deref();

        collection.before(&ctx, &subject, hooks, &self.options).await?;

        let documents = {
            let mut lease = collection.lease().await?;
            lease
                .connection()?
                .aggregate(&collection.ns, &self.pipeline)
                .await?
        };
        debug!(target: "docflow::collection", ns = %collection.ns, count = documents.len(), "aggregated");

        collection.after(&ctx, &subject, hooks, &self.options).await?;

        Ok(documents)
    }
}
