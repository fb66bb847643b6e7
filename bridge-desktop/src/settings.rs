//! Process-local settings storage

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SettingsStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory settings store
///
/// Clones share the same map, so a value written through one window's handle
/// is visible to every other window of the same process.
#[derive(Clone, Default)]
pub struct MemorySettingsStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        debug!(key, "Stored setting");
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        debug!(key, "Deleted setting");
        Ok(())
    }
}
