//! Backend REST client for the cloud-storage endpoints
//!
//! All paths live under `{base}/{provider}/`. Every call except the
//! authorization-URL bootstrap carries a freshly issued bearer token. Calls
//! are made once; retrying is left to the user.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::TokenSource;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{LinkError, Result};
use crate::types::{
    AuthUrlResponse, AuthorizeRequest, AuthorizedAccount, CloudProvider, ConnectionRecord,
    FilesResponse, ImportRequest, ProjectRequest, RemoteItem, SetFolderRequest, StatusResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed client for one provider's backend endpoints.
#[derive(Clone)]
pub struct BackendClient {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    provider: CloudProvider,
}

impl BackendClient {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenSource>,
        base_url: impl Into<String>,
        provider: CloudProvider,
    ) -> Self {
        Self {
            http_client,
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider,
        }
    }

    pub fn provider(&self) -> CloudProvider {
        self.provider
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.provider.path_segment(),
            path
        )
    }

    fn project_endpoint(&self, path: &str, project_id: &str) -> String {
        self.endpoint(&format!("{}/{}", path, urlencoding::encode(project_id)))
    }

    async fn authorized(&self, request: HttpRequest) -> Result<HttpRequest> {
        let token = self.tokens.bearer_token().await?;
        Ok(request.bearer_token(token))
    }

    #[instrument(skip(self, request), fields(provider = %self.provider.path_segment(), url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute(request.timeout(REQUEST_TIMEOUT))
            .await
            .map_err(|e| {
                warn!("Backend unreachable: {}", e);
                LinkError::Network(e.to_string())
            })?;

        if !response.is_success() {
            let message = response.error_message();
            warn!(status = response.status, "Backend request failed: {}", message);
            return Err(LinkError::Backend {
                status: response.status,
                message,
            });
        }

        debug!(status = response.status, "Backend request succeeded");
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json()
            .map_err(|e| LinkError::Parse(e.to_string()))
    }

    /// Consent URL for `project_id`. Sent without a bearer token.
    ///
    /// The backend is expected to carry `project_id` verbatim as the OAuth
    /// `state`; [`LinkCallbackHandler`](crate::LinkCallbackHandler) reads it
    /// back as the project to exchange the code for.
    pub async fn auth_url(&self, project_id: &str) -> Result<String> {
        let request = HttpRequest::new(HttpMethod::Get, self.project_endpoint("auth-url", project_id));
        let response: AuthUrlResponse = self.send_json(request).await?;
        Ok(response.auth_url)
    }

    pub async fn status(&self, project_id: &str) -> Result<ConnectionRecord> {
        let request = self
            .authorized(HttpRequest::new(
                HttpMethod::Get,
                self.project_endpoint("status", project_id),
            ))
            .await?;
        let response: StatusResponse = self.send_json(request).await?;
        Ok(response.into_record(project_id))
    }

    /// Folders and files under `folder_id`, or under the account root.
    pub async fn list_items(
        &self,
        project_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<RemoteItem>> {
        let mut url = self.project_endpoint("files", project_id);
        if let Some(folder_id) = folder_id {
            url.push_str("?folderId=");
            url.push_str(&urlencoding::encode(folder_id));
        }
        let request = self
            .authorized(HttpRequest::new(HttpMethod::Get, url))
            .await?;
        let response: FilesResponse = self.send_json(request).await?;
        Ok(response.into_items())
    }

    pub async fn set_folder(
        &self,
        project_id: &str,
        folder_id: &str,
        folder_name: &str,
    ) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint("set-folder")).json(
            &SetFolderRequest {
                project_id,
                folder_id,
                folder_name,
            },
        )?;
        self.send(self.authorized(request).await?).await?;
        Ok(())
    }

    pub async fn import_files(&self, project_id: &str, file_ids: &[String]) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint("import"))
            .json(&ImportRequest {
                project_id,
                file_ids,
            })?;
        self.send(self.authorized(request).await?).await?;
        Ok(())
    }

    pub async fn disconnect(&self, project_id: &str) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint("disconnect"))
            .json(&ProjectRequest { project_id })?;
        self.send(self.authorized(request).await?).await?;
        Ok(())
    }

    /// Exchange an authorization code for a stored link.
    pub async fn authorize(&self, project_id: &str, code: &str) -> Result<AuthorizedAccount> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint("authorize"))
            .json(&AuthorizeRequest { code, project_id })?;
        let response = self.send(self.authorized(request).await?).await?;
        if response.body.is_empty() {
            return Ok(AuthorizedAccount::default());
        }
        response.json().map_err(|e| LinkError::Parse(e.to_string()))
    }
}
