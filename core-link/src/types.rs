//! Linking domain types and backend wire shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud-storage providers a project can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudProvider {
    OneDrive,
    GoogleDrive,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 2] = [CloudProvider::OneDrive, CloudProvider::GoogleDrive];

    /// Backend path segment (`{base}/{segment}/...`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            CloudProvider::OneDrive => "onedrive",
            CloudProvider::GoogleDrive => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::OneDrive => "OneDrive",
            CloudProvider::GoogleDrive => "Google Drive",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.path_segment() == segment)
    }

    /// Name given to the consent window.
    pub fn window_name(&self) -> String {
        format!("{}-link", self.path_segment())
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Lifecycle of one link attempt.
///
/// ```text
/// Idle ──> Opening ──> AwaitingCallback ──> Succeeded
///                             │
///                             └───────────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Reserved, authorization URL still being fetched
    Idle,
    Opening,
    AwaitingCallback,
    Succeeded,
    Failed,
}

impl LinkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkStatus::Succeeded | LinkStatus::Failed)
    }
}

/// Observable state of a link attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSessionSnapshot {
    pub project_id: String,
    pub provider: CloudProvider,
    pub attempt_id: String,
    pub status: LinkStatus,
    pub error: Option<String>,
    pub account_email: Option<String>,
    /// The consent window was seen closed
    pub popup_closed: bool,
}

impl LinkSessionSnapshot {
    pub(crate) fn reserved(project_id: &str, provider: CloudProvider, attempt_id: String) -> Self {
        Self {
            project_id: project_id.to_string(),
            provider,
            attempt_id,
            status: LinkStatus::Idle,
            error: None,
            account_email: None,
            popup_closed: false,
        }
    }

    /// Window gone without a terminal message. The attempt may still
    /// complete if a late message arrives.
    pub fn is_ambiguous(&self) -> bool {
        self.popup_closed && !self.status.is_terminal()
    }
}

/// Cached view of a project's cloud-storage link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub project_id: String,
    pub connected: bool,
    pub account_email: Option<String>,
    pub folder_id: Option<String>,
    pub folder_name: Option<String>,
}

impl ConnectionRecord {
    pub fn disconnected(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            connected: false,
            account_email: None,
            folder_id: None,
            folder_name: None,
        }
    }
}

/// File or folder in the linked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub size: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// One level of the folder path shown above the browser listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: String,
    pub name: String,
}

// ============================================================================
// Backend wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthUrlResponse {
    pub auth_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub connected: bool,
    pub email: Option<String>,
    pub folder_id: Option<String>,
    pub folder_name: Option<String>,
}

impl StatusResponse {
    pub fn into_record(self, project_id: &str) -> ConnectionRecord {
        ConnectionRecord {
            project_id: project_id.to_string(),
            connected: self.connected,
            account_email: self.email,
            folder_id: self.folder_id,
            folder_name: self.folder_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    /// RFC 3339
    pub created_at: Option<String>,
}

impl RemoteEntry {
    pub fn into_item(self, is_folder: bool) -> RemoteItem {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        RemoteItem {
            id: self.id,
            name: self.name,
            is_folder,
            size: self.size,
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FilesResponse {
    #[serde(default)]
    pub folders: Vec<RemoteEntry>,
    #[serde(default)]
    pub files: Vec<RemoteEntry>,
}

impl FilesResponse {
    /// Folders first, then files, each in backend order.
    pub fn into_items(self) -> Vec<RemoteItem> {
        self.folders
            .into_iter()
            .map(|f| f.into_item(true))
            .chain(self.files.into_iter().map(|f| f.into_item(false)))
            .collect()
    }
}

/// Account details returned by the code exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorizedAccount {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectRequest<'a> {
    pub project_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetFolderRequest<'a> {
    pub project_id: &'a str,
    pub folder_id: &'a str,
    pub folder_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportRequest<'a> {
    pub project_id: &'a str,
    pub file_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorizeRequest<'a> {
    pub code: &'a str,
    pub project_id: &'a str,
}
