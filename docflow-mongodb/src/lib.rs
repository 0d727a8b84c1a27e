//! MongoDB store driver for docflow.
//!
//! To use this driver, enable the `mongodb` feature of the facade crate:
//!
//! ```toml
//! [dependencies]
//! docflow = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docflow::{Client, ClientConfig, mongodb::MongoDbStore};
//!
//! let config = ClientConfig::new("mongodb://localhost:27017").database("app");
//! let client = Client::connect(MongoDbStore::builder().app_name("billing"), config).await?;
//! ```
//!
//! Transactions require a replica set or sharded deployment.

#[allow(unused_extern_crates)]
extern crate self as docflow_mongodb;

mod query;
pub mod store;

pub use store::{MongoDbConnection, MongoDbStore, MongoDbStoreBuilder};
