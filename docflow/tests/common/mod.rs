#![allow(dead_code)]

use std::time::Duration;

use docflow::{memory::MemoryBackend, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct UserInfo {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub age: i32,
    pub weight: i32,
    #[serde(rename = "createAt")]
    pub created_at: Option<DateTime>,
    #[serde(rename = "updateAt")]
    pub updated_at: Option<DateTime>,
}

impl UserInfo {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            age,
            weight: 50,
            created_at: None,
            updated_at: None,
        }
    }
}

pub async fn connect(backend: MemoryBackend) -> Client {
    connect_with(backend, PoolConfig::default()).await
}

pub async fn connect_with(backend: MemoryBackend, pool: PoolConfig) -> Client {
    Client::with_backend(backend, ClientConfig::default().database("test").pool(pool))
        .await
        .unwrap()
}

/// A pool holding exactly one connection, failing fast when it is busy.
pub fn single_connection() -> PoolConfig {
    PoolConfig::default()
        .max_pool_size(1)
        .acquire_timeout(Duration::from_millis(50))
}

pub async fn seed_ages(users: &Collection<'_>) {
    let records = [6, 6, 6, 6, 7, 8]
        .into_iter()
        .enumerate()
        .map(|(index, age)| UserInfo::new(&format!("user-{index}"), age))
        .collect::<Vec<_>>();

    users.insert_many(&records).await.unwrap();
}
