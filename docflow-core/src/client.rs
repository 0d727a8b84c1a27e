//! Client entry point.
//!
//! A [`Client`] owns the connection pool. It hands out [`Database`] and [`Collection`] handles,
//! which are cheap to clone and share the pool.
//!
//! ```ignore
//! let client = Client::connect(MongoBackendBuilder, ClientConfig::new(uri).database("test")).await?;
//! let users = client.default_database()?.collection("users");
//! users.insert_one(&user).await?;
//! client.close().await?;
//! ```

use std::{ops::AsyncFnOnce, sync::Arc};

use tracing::info;

use crate::{
    backend::{Namespace, StoreBackend, StoreBackendBuilder},
    collection::Collection,
    config::ClientConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    pool::{ConnectionManager, PoolStatus},
    transaction::{self, Transaction},
};

/// Handle to a document store.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Arc<ConnectionManager>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Validates `config`, builds the backend and opens the pool.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] for invalid settings, or the backend's error
    /// when it cannot be built or the initial connections cannot be dialled.
    pub async fn connect<B: StoreBackendBuilder>(
        builder: B,
        config: ClientConfig,
    ) -> DocumentStoreResult<Self> {
        config.validate()?;
        let backend = builder.build(&config).await?;
        Self::with_backend(backend, config).await
    }

    /// Opens a client on an already built backend.
    pub async fn with_backend(
        backend: impl StoreBackend + 'static,
        config: ClientConfig,
    ) -> DocumentStoreResult<Self> {
        config.validate()?;
        let pool = ConnectionManager::open(Arc::new(backend), &config.pool).await?;

        info!(
            target: "docflow::pool",
            min_pool_size = config.pool.min_pool_size,
            max_pool_size = config.pool.max_pool_size,
            "client connected"
        );

        Ok(Self { pool, config: Arc::new(config) })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn database(&self, name: impl Into<String>) -> Database {
        Database { name: name.into(), pool: self.pool.clone() }
    }

    /// The database named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] when no default database is configured.
    pub fn default_database(&self) -> DocumentStoreResult<Database> {
        self.config
            .database
            .as_deref()
            .map(|name| self.database(name))
            .ok_or_else(|| DocumentStoreError::Configuration("no default database configured".to_string()))
    }

    /// The collection named in the configuration, within the default database.
    pub fn default_collection(&self) -> DocumentStoreResult<Collection<'static>> {
        let database = self.default_database()?;
        self.config
            .collection
            .as_deref()
            .map(|name| database.collection(name))
            .ok_or_else(|| DocumentStoreError::Configuration("no default collection configured".to_string()))
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Closes the pool. Waiting and later operations fail with [`DocumentStoreError::Closed`];
    /// leased sessions are closed as they are returned. Closing twice is a no-op.
    pub async fn close(&self) -> DocumentStoreResult<()> {
        self.pool.close().await
    }
}

/// Handle to one database.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    pool: Arc<ConnectionManager>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection<'static> {
        Collection::pooled(Namespace::new(self.name.clone(), name), self.pool.clone())
    }

    /// Runs `unit` inside a transaction. See [`crate::transaction`].
    pub async fn do_transaction<T, F>(&self, unit: F) -> DocumentStoreResult<T>
    where
        F: AsyncFnOnce(&Transaction) -> DocumentStoreResult<T>,
    {
        transaction::run(&self.pool, &self.name, None, unit).await
    }
}
