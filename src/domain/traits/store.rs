use async_trait::async_trait;
use crate::application::errors::StorageError;

/// Store trait - the persisted key-value configuration map
#[async_trait]
pub trait Store: Send + Sync {
    // Key-value operations
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn list(&self) -> Result<Vec<(String, String)>, StorageError>;

    // Per-plugin setting rows, values JSON-encoded
    async fn plugin_settings(&self, plugin: &str) -> Result<Vec<(String, String)>, StorageError>;
    async fn set_plugin_setting(&self, plugin: &str, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete_plugin_settings(&self, plugin: &str) -> Result<(), StorageError>;
}
