//! Store driver seam.
//!
//! The client never talks to a network protocol directly. It leases [`StoreConnection`]s, which
//! a [`StoreBackend`] dials, from the connection pool and issues structured operations on them.
//!
//! # Traits
//!
//! - [`StoreBackend`]: dials connections and owns driver-wide resources
//! - [`StoreConnection`]: one exclusively-owned session with the store, optionally inside a
//!   transaction
//! - [`StoreBackendBuilder`]: factory turning a [`ClientConfig`] into a backend
//!
//! # Implementing a driver
//!
//! Every operation receives the [`Namespace`] it targets and a structured expression
//! ([`Expr`], [`Update`], [`Pipeline`]). Drivers translate these with a
//! [`crate::query::QueryVisitor`] or evaluate them directly. Identifier and timestamp fields
//! have already been filled in by the time a document reaches the driver.
//!
//! Operations issued between `start_transaction` and `commit_transaction` /
//! `abort_transaction` must be atomic as a group.

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    config::ClientConfig,
    error::DocumentStoreResult,
    pipeline::Pipeline,
    query::{Expr, FindSpec},
    update::Update,
};

/// A database and collection pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Outcome of an update, replace or upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Documents selected by the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// Identifier of the inserted document when an upsert matched nothing.
    pub upserted_id: Option<Bson>,
}

/// Outcome of a remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// A driver: dials connections and owns driver-wide resources.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Connection`](crate::error::DocumentStoreError::Connection)
    /// when the store cannot be reached.
    async fn connect(&self) -> DocumentStoreResult<Box<dyn StoreConnection>>;

    /// Releases driver-wide resources. Called once when the client closes, after every pooled
    /// connection has been closed.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// One session with the store.
///
/// A connection is leased by exactly one caller at a time, so every operation takes `&mut self`.
#[async_trait]
pub trait StoreConnection: Send + Sync + Debug {
    /// Inserts documents, returning their `_id` values in input order.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DuplicateKey`](crate::error::DocumentStoreError::DuplicateKey)
    /// when an `_id` already exists.
    async fn insert(&mut self, ns: &Namespace, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>>;

    async fn find(&mut self, ns: &Namespace, spec: &FindSpec) -> DocumentStoreResult<Vec<Document>>;

    async fn count(&mut self, ns: &Namespace, filter: &Expr) -> DocumentStoreResult<u64>;

    /// Applies `update` to the first (or, with `multi`, every) matching document. With `upsert`
    /// and no match, inserts a document built from the equality terms of `filter` with the update
    /// applied.
    async fn update(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        update: &Update,
        multi: bool,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Replaces the first matching document, keeping its `_id`. With `upsert` and no match,
    /// inserts `document`.
    async fn replace(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        document: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Removes the first (or, with `multi`, every) matching document.
    async fn delete(&mut self, ns: &Namespace, filter: &Expr, multi: bool) -> DocumentStoreResult<DeleteResult>;

    async fn aggregate(&mut self, ns: &Namespace, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>>;

    async fn start_transaction(&mut self) -> DocumentStoreResult<()>;

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()>;

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()>;

    /// Returns `true` between `start_transaction` and the matching commit or abort.
    fn in_transaction(&self) -> bool;

    /// Returns `false` once the connection saw a transport failure and must not be reused.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Closes the connection. The pool calls it at most once, and never reuses the connection
    /// afterwards.
    async fn close(&mut self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Factory for backends, used by [`crate::client::Client::connect`].
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend + 'static;

    async fn build(self, config: &ClientConfig) -> DocumentStoreResult<Self::Backend>;
}
