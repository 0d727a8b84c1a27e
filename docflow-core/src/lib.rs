//! Core of docflow, a typed document-database client.
//!
//! This crate provides:
//!
//! - **Records** ([`record`], [`field`], [`validate`]) - typed documents, identifier and
//!   timestamp injection, declarative validation
//! - **Client handles** ([`client`], [`collection`], [`transaction`]) - databases, collections and
//!   the operations on them
//! - **Expressions** ([`query`], [`update`], [`pipeline`]) - structured filters, update
//!   operators and aggregation pipelines
//! - **Interception** ([`hook`], [`middleware`], [`op`]) - per-record hooks and process-wide
//!   middleware around every operation
//! - **Driver seam** ([`backend`], [`pool`], [`config`]) - store drivers, the bounded
//!   connection pool and its configuration
//! - **Errors** ([`error`])
//!
//! # Example
//!
//! ```ignore
//! use docflow::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: ObjectId,
//!     #[validate(required)]
//!     pub name: String,
//!     #[validate(range(min = 0, max = 150))]
//!     pub age: i32,
//! }
//!
//! let users = client.database("app").collection("users");
//! let inserted = users.insert_one(&user).await?;
//! let adults: Vec<User> = users.find(Filter::gte("age", 18)).all().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docflow_core;

pub mod backend;
pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod field;
pub mod hook;
pub mod middleware;
pub mod op;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod record;
pub mod transaction;
pub mod update;
pub mod validate;
