use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use super::KeyValueStore;
use crate::error::StoreError;

/// Process-local store used in tests and when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryStore {
    hashes: DashMap<String, HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let emptied = match self.hashes.get_mut(key) {
            Some(mut hash) => {
                hash.remove(field);
                hash.is_empty()
            }
            None => false,
        };
        if emptied {
            self.hashes.remove_if(key, |_, hash| hash.is_empty());
        }
        Ok(())
    }

    async fn keys_with_field(&self, field: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .hashes
            .iter()
            .filter(|entry| entry.value().contains_key(field))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
