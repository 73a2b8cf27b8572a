//! Settings Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, error};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed settings store implementation
///
/// Provides persistent key-value storage using SQLite:
/// - JSON document values
/// - Upsert on write
/// - Ordered prefix listing
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Create a new settings store with the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // Convert path to string, replacing backslashes with forward slashes for SQLite URL
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;
        debug!(path = ?db_path, "Initialized settings store");

        Ok(Self { pool })
    }

    /// Create an in-memory settings store (for testing)
    ///
    /// Uses a single connection; every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    /// Get the current Unix timestamp
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// Escape `LIKE` wildcards so a prefix matches literally
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_value(&self, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to set setting: {}", e)))?;

        debug!(key = key, "Stored setting");
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to get setting: {}", e)))?;

        match row {
            Some(row) => {
                let raw: String = row.get(0);
                let value = serde_json::from_str(&raw).map_err(|e| {
                    error!(key = key, error = %e, "Stored setting is not valid JSON");
                    BridgeError::Serialization(e)
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to delete setting: {}", e))
            })?;

        debug!(key = key, "Deleted setting");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM settings WHERE key LIKE ? ESCAPE '\\' ORDER BY key")
            .bind(like_prefix(prefix))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to list keys: {}", e)))?;

        // LIKE is case-insensitive for ASCII in SQLite
        let keys = rows
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .filter(|key| key.starts_with(prefix))
            .collect();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.list_keys(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }

        debug!(prefix = prefix, removed = keys.len(), "Deleted settings by prefix");
        Ok(keys.len() as u64)
    }
}

/// In-memory settings store
///
/// Nothing survives the process. Suitable for tests and for hosts that
/// provide durability elsewhere.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_value(&self, key: &str, value: &Value) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.values.read().await.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let values = self.values.read().await;
        Ok(values
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::storage::SettingsStoreExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_settings_store_creation() {
        let _store = SqliteSettingsStore::in_memory().await.unwrap();
    }

    #[tokio::test]
    async fn test_value_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store
            .set_value("test_key", &json!({"processed": 3}))
            .await
            .unwrap();
        let value = store.get_value("test_key").await.unwrap();
        assert_eq!(value, Some(json!({"processed": 3})));

        store.set_value("test_key", &json!(7)).await.unwrap();
        assert_eq!(store.get_value("test_key").await.unwrap(), Some(json!(7)));

        store.delete("test_key").await.unwrap();
        assert_eq!(store.get_value("test_key").await.unwrap(), None);
        assert!(!store.has_key("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_typed_helpers_over_sqlite() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_as("flag", &true).await.unwrap();
        assert_eq!(store.get_as::<bool>("flag").await.unwrap(), Some(true));

        store.set_as("ids", &vec![5_i64, 4]).await.unwrap();
        assert_eq!(
            store.get_as::<Vec<i64>>("ids").await.unwrap(),
            Some(vec![5, 4])
        );
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_value("job_batch_2", &json!([])).await.unwrap();
        store.set_value("job_batch_1", &json!([])).await.unwrap();
        store.set_value("JOB_BATCH_3", &json!([])).await.unwrap();
        store.set_value("job_stopped", &json!(true)).await.unwrap();
        store.set_value("jobXbatch_9", &json!([])).await.unwrap();

        let keys = store.list_keys("job_batch_").await.unwrap();
        assert_eq!(keys, vec!["job_batch_1", "job_batch_2"]);

        let removed = store.delete_prefix("job_batch_").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.has_key("job_stopped").await.unwrap());
    }

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
        assert_eq!(like_prefix("plain"), "plain%");
    }

    #[tokio::test]
    async fn test_memory_store_prefix_listing() {
        let store = MemorySettingsStore::new();

        store.set_value("b_1", &json!(1)).await.unwrap();
        store.set_value("a_2", &json!(2)).await.unwrap();
        store.set_value("a_1", &json!(1)).await.unwrap();

        assert_eq!(store.list_keys("a_").await.unwrap(), vec!["a_1", "a_2"]);
        assert_eq!(store.list_keys("").await.unwrap().len(), 3);

        store.delete("a_1").await.unwrap();
        assert!(!store.has_key("a_1").await.unwrap());
        assert_eq!(store.delete_prefix("a_").await.unwrap(), 1);
    }
}
