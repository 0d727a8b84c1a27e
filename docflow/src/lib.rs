//! docflow: a typed document-database client.
//!
//! This crate is the entry point. It re-exports the core client from `docflow-core`, the
//! `#[derive(Record)]` macro and the store drivers.
//!
//! # Features
//!
//! - **Typed records** - serde structs with generated identifiers and timestamps
//! - **Hooks and middleware** - per-record lifecycle hooks and process-wide interceptors around
//!   every operation
//! - **Declarative validation** - `#[validate(...)]` constraints reporting every violation
//! - **Pooled sessions and transactions** - a bounded connection pool and closure-scoped
//!   transactions
//!
//! # Quick Start
//!
//! ```ignore
//! use docflow::{prelude::*, memory::MemoryBackend};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct UserInfo {
//!     #[serde(rename = "_id")]
//!     pub id: ObjectId,
//!     pub name: String,
//!     pub age: u16,
//!     #[serde(rename = "createAt")]
//!     pub created_at: DateTime,
//!     #[serde(rename = "updateAt")]
//!     pub updated_at: DateTime,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let client = Client::with_backend(MemoryBackend::new(), ClientConfig::default()).await?;
//!     let users = client.database("app").collection("users");
//!
//!     let inserted = users.insert_one(&user).await?;
//!     let found: UserInfo = users.find(Filter::id(inserted.inserted_id)).one().await?;
//!
//!     users
//!         .update_many(Filter::lt("age", 10), Update::new().set("age", 10))
//!         .await?;
//!
//!     client.close().await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! client
//!     .database("app")
//!     .do_transaction(async |tx| {
//!         let users = tx.collection("users");
//!         users.insert_one(&alice).await?;
//!         users.remove_id(bob_id).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - in-process store for development and testing
//! - [`mongodb`] - MongoDB driver (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docflow;

pub mod prelude;

pub use docflow_core::{
    backend, client, collection, config, error, field, hook, middleware, op, pipeline, pool, query,
    record, transaction, update, validate,
};
pub use docflow_core::{
    client::{Client, Database},
    config::{ClientConfig, PoolConfig},
    error::{DocumentStoreError, DocumentStoreResult},
};
pub use docflow_macros::Record;

// Re-exported so users can implement hooks and middleware without extra dependencies.
pub use async_trait::async_trait;
pub use bson;

/// In-memory store driver.
pub mod memory {
    pub use docflow_memory::{MemoryBackend, MemoryBackendBuilder, MemoryConnection};
}

/// MongoDB store driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docflow_mongodb::{MongoDbConnection, MongoDbStore, MongoDbStoreBuilder};
}
