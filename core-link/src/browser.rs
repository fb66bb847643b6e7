//! Folder navigation and file import for a linked project

use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::api::BackendClient;
use crate::error::{LinkError, Result};
use crate::status::ConnectionStatusStore;
use crate::types::{Breadcrumb, RemoteItem};

#[derive(Debug, Default)]
struct BrowserState {
    path: Vec<Breadcrumb>,
    items: Vec<RemoteItem>,
    selected: BTreeSet<String>,
}

impl BrowserState {
    fn file_ids(&self) -> impl Iterator<Item = &String> {
        self.items.iter().filter(|i| !i.is_folder).map(|i| &i.id)
    }
}

/// Browses the account linked to one project.
///
/// Every listing replaces the current items and clears the selection.
pub struct RemoteFolderBrowser {
    project_id: String,
    api: BackendClient,
    status: ConnectionStatusStore,
    state: RwLock<BrowserState>,
}

impl RemoteFolderBrowser {
    pub fn new(project_id: impl Into<String>, api: BackendClient, status: ConnectionStatusStore) -> Self {
        Self {
            project_id: project_id.into(),
            api,
            status,
            state: RwLock::new(BrowserState::default()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub async fn items(&self) -> Vec<RemoteItem> {
        self.state.read().await.items.clone()
    }

    pub async fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.state.read().await.path.clone()
    }

    /// Folder currently listed; `None` at the account root.
    pub async fn current_folder(&self) -> Option<Breadcrumb> {
        self.state.read().await.path.last().cloned()
    }

    /// Selected file ids, sorted.
    pub async fn selected(&self) -> Vec<String> {
        self.state.read().await.selected.iter().cloned().collect()
    }

    async fn list(&self, path: Vec<Breadcrumb>) -> Result<Vec<RemoteItem>> {
        let folder_id = path.last().map(|c| c.id.as_str());
        let items = self.api.list_items(&self.project_id, folder_id).await?;

        let mut state = self.state.write().await;
        state.path = path;
        state.items = items.clone();
        state.selected.clear();
        Ok(items)
    }

    #[instrument(skip(self), fields(project_id = %self.project_id))]
    pub async fn open_root(&self) -> Result<Vec<RemoteItem>> {
        self.list(Vec::new()).await
    }

    /// Descend into `folder`.
    #[instrument(skip(self, folder), fields(project_id = %self.project_id, folder_id = %folder.id))]
    pub async fn open_folder(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>> {
        if !folder.is_folder {
            return Err(LinkError::NotAFolder {
                id: folder.id.clone(),
            });
        }
        let mut path = self.breadcrumbs().await;
        path.push(Breadcrumb {
            id: folder.id.clone(),
            name: folder.name.clone(),
        });
        self.list(path).await
    }

    /// Jump to breadcrumb `index`; 0 is the account root.
    pub async fn navigate_to(&self, index: usize) -> Result<Vec<RemoteItem>> {
        let mut path = self.breadcrumbs().await;
        if index > path.len() {
            return Err(LinkError::InvalidCrumb { index });
        }
        path.truncate(index);
        self.list(path).await
    }

    /// Flip the selection of a listed file. Returns whether it is now
    /// selected; folders and unknown ids are ignored.
    pub async fn toggle(&self, file_id: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.file_ids().any(|id| id == file_id) {
            return false;
        }
        if state.selected.remove(file_id) {
            false
        } else {
            state.selected.insert(file_id.to_string());
            true
        }
    }

    /// Select every listed file, or clear the selection when all of them
    /// already are.
    pub async fn toggle_all(&self) {
        let mut state = self.state.write().await;
        let files: BTreeSet<String> = state.file_ids().cloned().collect();
        if !files.is_empty() && state.selected == files {
            state.selected.clear();
        } else {
            state.selected = files;
        }
    }

    /// Make `folder` the project's default import folder.
    #[instrument(skip(self, folder), fields(project_id = %self.project_id, folder_id = %folder.id))]
    pub async fn set_default_folder(&self, folder: &RemoteItem) -> Result<()> {
        if !folder.is_folder {
            return Err(LinkError::NotAFolder {
                id: folder.id.clone(),
            });
        }
        self.api
            .set_folder(&self.project_id, &folder.id, &folder.name)
            .await?;
        self.status
            .apply_default_folder(&self.project_id, &folder.id, &folder.name)
            .await;
        info!(folder_name = %folder.name, "Default folder set");
        Ok(())
    }

    /// Import the selected files into the project. Returns how many were
    /// imported.
    #[instrument(skip(self), fields(project_id = %self.project_id))]
    pub async fn import_selected(&self) -> Result<usize> {
        let file_ids = self.selected().await;
        if file_ids.is_empty() {
            return Err(LinkError::EmptySelection);
        }

        self.api.import_files(&self.project_id, &file_ids).await?;
        self.state.write().await.selected.clear();
        info!(count = file_ids.len(), "Files imported");

        if let Err(e) = self.status.refresh(&self.project_id).await {
            warn!("Status refresh after import failed: {}", e);
        }
        Ok(file_ids.len())
    }
}
