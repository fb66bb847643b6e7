//! # Pending Link Registry
//!
//! Projects with a consent window open, shared with the callback window
//! through the host [`SettingsStore`]. Each provider has its own entry,
//! `{pending_project_key}:{provider segment}`, holding a JSON array of
//! project ids.
//!
//! The callback window only falls back to this registry when the provider
//! redirect carries no `state`, and only when exactly one project is
//! pending for the provider. With several in flight it cannot tell them
//! apart and does not guess.

use bridge_traits::SettingsStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::linker::LinkEnvironment;
use crate::types::CloudProvider;

pub struct PendingProjects {
    store: Arc<dyn SettingsStore>,
    key: String,
    // Serializes this owner's read-modify-write cycles.
    lock: Mutex<()>,
}

impl PendingProjects {
    pub fn new(env: &LinkEnvironment, provider: CloudProvider) -> Self {
        Self {
            store: Arc::clone(&env.settings_store),
            key: format!(
                "{}:{}",
                env.settings.pending_project_key,
                provider.path_segment()
            ),
            lock: Mutex::new(()),
        }
    }

    /// Settings key of this provider's entry.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Pending projects, in registration order. An unreadable entry counts
    /// as empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        let Some(raw) = self.store.get_string(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(projects) => Ok(projects),
            Err(e) => {
                warn!(key = %self.key, "Discarding unreadable pending entry: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn add(&self, project_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut projects = self.list().await?;
        if !projects.iter().any(|p| p == project_id) {
            projects.push(project_id.to_string());
        }
        self.write(&projects).await
    }

    pub async fn remove(&self, project_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut projects = self.list().await?;
        let before = projects.len();
        projects.retain(|p| p != project_id);
        if projects.len() == before {
            return Ok(());
        }
        self.write(&projects).await
    }

    /// The only pending project, or `None` when zero or several are pending.
    pub async fn sole(&self) -> Result<Option<String>> {
        let mut projects = self.list().await?;
        if projects.len() == 1 {
            Ok(projects.pop())
        } else {
            Ok(None)
        }
    }

    async fn write(&self, projects: &[String]) -> Result<()> {
        if projects.is_empty() {
            return Ok(self.store.delete(&self.key).await?);
        }
        let raw = serde_json::to_string(projects)
            .map_err(|e| crate::error::LinkError::Parse(e.to_string()))?;
        Ok(self.store.set_string(&self.key, &raw).await?)
    }
}
