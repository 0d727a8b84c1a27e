//! Client and pool configuration.
//!
//! Both structs deserialize with serde (durations are given in milliseconds) and offer
//! builder-style setters:
//!
//! ```ignore
//! let config = ClientConfig::new("mongodb://localhost:27017")
//!     .database("test")
//!     .collection("users")
//!     .pool(PoolConfig::default().min_pool_size(2).max_pool_size(10));
//! ```
//!
//! Configuration is checked by [`ClientConfig::validate`] when the client connects.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    pool::PoolMonitor,
};

pub const DEFAULT_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection pool settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Connections dialled when the pool opens and kept by the idle reaper.
    pub min_pool_size: usize,
    /// Upper bound on concurrently leased connections.
    pub max_pool_size: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(with = "millis")]
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed by the reaper. `None` disables the reaper.
    #[serde(with = "opt_millis")]
    pub max_idle_time: Option<Duration>,
    #[serde(skip)]
    pub monitor: Option<Arc<dyn PoolMonitor>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            max_idle_time: None,
            monitor: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_idle_time", &self.max_idle_time)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

impl PoolConfig {
    pub fn min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    /// Receives pool lifecycle events.
    pub fn monitor(mut self, monitor: impl PoolMonitor + 'static) -> Self {
        self.monitor = Some(Arc::new(monitor));
        self
    }

    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] when `max_pool_size` is zero or smaller than
    /// `min_pool_size`.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.max_pool_size == 0 {
            return Err(DocumentStoreError::Configuration(
                "max_pool_size must be at least 1".to_string(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(DocumentStoreError::Configuration(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}

/// Settings for [`crate::client::Client::connect`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Store connection string, interpreted by the backend builder.
    pub uri: String,
    /// Database returned by `Client::default_database`.
    pub database: Option<String>,
    /// Collection returned by `Client::default_collection`.
    pub collection: Option<String>,
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: None,
            collection: None,
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), ..Self::default() }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] for an empty uri, a default collection without
    /// a default database, or invalid pool bounds.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.uri.trim().is_empty() {
            return Err(DocumentStoreError::Configuration("uri must not be empty".to_string()));
        }
        if self.collection.is_some() && self.database.is_none() {
            return Err(DocumentStoreError::Configuration(
                "a default collection requires a default database".to_string(),
            ));
        }
        self.pool.validate()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_with_millisecond_durations() {
        let config: ClientConfig = serde_json::from_value(json!({
            "uri": "mongodb://db:27017",
            "database": "test",
            "pool": { "maxPoolSize": 4, "acquireTimeout": 250, "maxIdleTime": 60000 }
        }))
        .unwrap();

        assert_eq!(config.database.as_deref(), Some("test"));
        assert_eq!(config.pool.max_pool_size, 4);
        assert_eq!(config.pool.min_pool_size, 0);
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.pool.max_idle_time, Some(Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let config = ClientConfig::default().pool(PoolConfig::default().min_pool_size(5).max_pool_size(2));
        assert!(matches!(config.validate(), Err(DocumentStoreError::Configuration(_))));

        let config = ClientConfig::default().pool(PoolConfig::default().max_pool_size(0));
        assert!(matches!(config.validate(), Err(DocumentStoreError::Configuration(_))));
    }

    #[test]
    fn rejects_collection_without_database() {
        let config = ClientConfig::default().collection("users");
        assert!(matches!(config.validate(), Err(DocumentStoreError::Configuration(_))));
    }
}
