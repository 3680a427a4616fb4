//! Redis-backed counter store.
//!
//! Plain `GET`/`SET` of decimal strings under the resource key itself
//! (`available_seats`, `item.1`). Redis gives no conditional decrement through
//! this client, so the engine serializes decrements per key in front of it.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use shared::ResourceKey;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{parse_count, CounterStore};

#[derive(Clone)]
pub struct RedisCounterStore {
    conn_manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connects to `redis_url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_count(&self, key: &ResourceKey) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(key.as_str())
            .await
            .map_err(|e| StoreError::Unavailable(format!("GET {key} failed: {e}")))?;

        debug!(key = %key, value = ?raw, "Read counter");
        raw.map(|raw| parse_count(key, &raw)).transpose()
    }

    async fn set_count(&self, key: &ResourceKey, count: u64) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set(key.as_str(), count.to_string())
            .await
            .map_err(|e| StoreError::Unavailable(format!("SET {key} failed: {e}")))?;

        debug!(key = %key, value = count, "Wrote counter");
        Ok(())
    }
}
