//! Persisted Key-Value Storage Abstractions
//!
//! Provides the platform-agnostic key/value store every piece of durable
//! sync state (queue segments, process metadata, checkpoints, failure
//! ledgers) is written to.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts the host's option table:
/// - Desktop: SQLite database or an in-memory map
/// - Hosted CMS: the host's options/settings table
///
/// Values are JSON documents. The store offers no transactions and no
/// compare-and-swap; callers that need mutual exclusion must build it on top
/// (see the dispatcher's persisted lock record).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{SettingsStore, SettingsStoreExt};
///
/// async fn remember_marker(store: &dyn SettingsStore) -> Result<()> {
///     store.set_as("bg_library_sync_stopped", &true).await?;
///     let stopped: Option<bool> = store.get_as("bg_library_sync_stopped").await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a value, replacing any previous value under the same key
    async fn set_value(&self, key: &str, value: &Value) -> Result<()>;

    /// Retrieve a value
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key).await?.is_some())
    }

    /// List keys starting with `prefix`, sorted ascending
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.list_keys(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len() as u64)
    }
}

/// Typed helpers layered over [`SettingsStore`] using serde.
#[async_trait]
pub trait SettingsStoreExt: SettingsStore {
    /// Read and deserialize a value
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a value
    async fn set_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set_value(key, &value).await
    }
}

impl<S: SettingsStore + ?Sized> SettingsStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore {
        values: Mutex<BTreeMap<String, Value>>,
    }

    #[async_trait]
    impl SettingsStore for MapStore {
        async fn set_value(&self, key: &str, value: &Value) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.clone());
            Ok(())
        }

        async fn get_value(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .values
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let store = MapStore::default();
        store.set_as("ids", &vec![3_i64, 2, 1]).await.unwrap();

        let ids: Option<Vec<i64>> = store.get_as("ids").await.unwrap();
        assert_eq!(ids, Some(vec![3, 2, 1]));

        let missing: Option<i64> = store.get_as("missing").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_typed_helper_rejects_wrong_shape() {
        let store = MapStore::default();
        store.set_as("name", "not a number").await.unwrap();

        let result: Result<Option<i64>> = store.get_as("name").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_delete_prefix() {
        let store = MapStore::default();
        store.set_as("job_batch_1", &1).await.unwrap();
        store.set_as("job_batch_2", &2).await.unwrap();
        store.set_as("job_meta", &3).await.unwrap();

        let removed = store.delete_prefix("job_batch_").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.has_key("job_meta").await.unwrap());
        assert!(!store.has_key("job_batch_1").await.unwrap());
    }
}
