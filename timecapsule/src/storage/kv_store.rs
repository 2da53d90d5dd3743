//! Key-value store
//!
//! String keys, string values. Structured state is stored as JSON through
//! [`load_json`] and [`save_json`].

use crate::database::Repository;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value; absent keys yield `None`
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::Storage(format!("Corrupt value under '{}': {}", key, e))),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

/// SQLite-backed store living in the `kv_store` table
#[derive(Clone)]
pub struct SqliteKvStore {
    repo: Repository,
}

impl SqliteKvStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.repo.kv_get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repo.kv_set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.repo.kv_remove(key).await
    }
}

/// Volatile store for tools and tests that need no persistence
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use serde::Deserialize;
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
    }

    #[tokio::test]
    async fn test_sqlite_store_json_roundtrip() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_database(&pool).await.unwrap();
        let store = SqliteKvStore::new(Repository::new(pool));

        save_json(&store, "sample", &Sample { count: 3 }).await.unwrap();
        let loaded: Option<Sample> = load_json(&store, "sample").await.unwrap();

        assert_eq!(loaded, Some(Sample { count: 3 }));
    }

    #[tokio::test]
    async fn test_missing_key_loads_none() {
        let store = MemoryKvStore::new();

        let loaded: Option<Sample> = load_json(&store, "missing").await.unwrap();

        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_storage_error() {
        let store = MemoryKvStore::new();
        store.set("sample", "not json").await.unwrap();

        let result: Result<Option<Sample>> = load_json(&store, "sample").await;

        assert!(matches!(result, Err(AppError::Storage(_))));
    }
}
