//! Per-project connection status cache
//!
//! The backend owns the truth; this store only caches what was last read so
//! screens can decide between the file browser and a "connect" prompt
//! without a round trip.

use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::api::BackendClient;
use crate::error::Result;
use crate::types::{CloudProvider, ConnectionRecord};

/// Connection records for one provider, keyed by project id. Clones share
/// the same cache.
#[derive(Clone)]
pub struct ConnectionStatusStore {
    api: BackendClient,
    event_bus: EventBus,
    records: Arc<RwLock<HashMap<String, ConnectionRecord>>>,
}

impl ConnectionStatusStore {
    pub fn new(api: BackendClient, event_bus: EventBus) -> Self {
        Self {
            api,
            event_bus,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn provider(&self) -> CloudProvider {
        self.api.provider()
    }

    /// Last known record, without touching the backend.
    pub async fn get(&self, project_id: &str) -> Option<ConnectionRecord> {
        self.records.read().await.get(project_id).cloned()
    }

    /// Re-read the record from the backend.
    ///
    /// On failure the project is cached as disconnected and the error is
    /// returned.
    #[instrument(skip(self), fields(provider = %self.provider()))]
    pub async fn refresh(&self, project_id: &str) -> Result<ConnectionRecord> {
        let result = self.api.status(project_id).await;
        let record = match &result {
            Ok(record) => record.clone(),
            Err(e) => {
                warn!("Status refresh failed, caching as disconnected: {}", e);
                ConnectionRecord::disconnected(project_id)
            }
        };

        info!(connected = record.connected, "Connection status refreshed");
        self.records
            .write()
            .await
            .insert(project_id.to_string(), record.clone());
        self.emit(LinkEvent::StatusRefreshed {
            project_id: project_id.to_string(),
            provider: self.provider().path_segment().to_string(),
            connected: record.connected,
        });

        result
    }

    /// Record a revoked link locally.
    pub async fn mark_disconnected(&self, project_id: &str) {
        self.records.write().await.insert(
            project_id.to_string(),
            ConnectionRecord::disconnected(project_id),
        );
        debug!(project_id, "Marked disconnected");
    }

    /// Record the default folder chosen for a linked project.
    pub async fn apply_default_folder(&self, project_id: &str, folder_id: &str, folder_name: &str) {
        let mut records = self.records.write().await;
        let record = records
            .entry(project_id.to_string())
            .or_insert_with(|| ConnectionRecord {
                connected: true,
                ..ConnectionRecord::disconnected(project_id)
            });
        record.folder_id = Some(folder_id.to_string());
        record.folder_name = Some(folder_name.to_string());
    }

    /// Drop the cached record so the next reader has to refresh.
    pub async fn invalidate(&self, project_id: &str) {
        self.records.write().await.remove(project_id);
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_bus.emit(CoreEvent::Link(event));
    }
}
