//! In-memory store driver for docflow.
//!
//! [`MemoryBackend`] implements the driver seam entirely in process: filters, update operators,
//! aggregation pipelines and snapshot-style transactions. It backs the integration tests and is
//! handy wherever a real store is not available.
//!
//! # Quick Start
//!
//! ```ignore
//! use docflow::{Client, ClientConfig, memory::MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! let client = Client::with_backend(backend.clone(), ClientConfig::default().database("test")).await?;
//! let users = client.database("test").collection("users");
//!
//! users.insert_one(&user).await?;
//! assert_eq!(backend.documents("test", "users").await.len(), 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docflow_memory;

mod aggregate;
mod evaluator;
pub mod store;
mod update;

pub use store::{MemoryBackend, MemoryBackendBuilder, MemoryConnection};
