mod memory;
mod redis_store;
mod trade;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
pub use self::trade::{Trade, TradeAction, TradeFilter, TradeQuery, TradeStatus, TradeStore};

pub const KEY_POOL_KEYS: &str = "storage::pool_keys";
pub const KEY_LOOKUP: &str = "storage::lookup";
pub const KEY_TRACKED_AMM: &str = "storage::tracked_amm";
pub const KEY_CHUNK: &str = "storage::chunk";

/// Hash-shaped key-value store: every record lives at `(key, field)`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;
    /// Keys that currently hold `field`.
    async fn keys_with_field(&self, field: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    field: &str,
) -> Result<Option<T>, StoreError> {
    match store.hget(key, field).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    field: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.hset(key, field, raw).await
}
