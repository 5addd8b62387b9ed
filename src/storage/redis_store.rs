use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tracing::debug;

use super::KeyValueStore;
use crate::error::StoreError;

/// Redis hashes over one multiplexed connection shared by all workers.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        debug!("redis connected: {url}");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn keys_with_field(&self, field: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("*").await?;
        let mut out = Vec::new();
        for key in keys {
            // non-hash keys answer HEXISTS with WRONGTYPE
            match conn.hexists::<_, _, bool>(&key, field).await {
                Ok(true) => out.push(key),
                Ok(false) | Err(_) => {}
            }
        }
        Ok(out)
    }
}
