//! # Link Callback Handler
//!
//! Runs in the consent window after the provider redirects back. It reads
//! the authorization outcome from the URL, exchanges the code with the
//! backend and reports once to the primary window, either by posting a
//! [`LinkMessage`] to the opener or, without an opener, by redirecting to
//! the return page with [`ReturnFlags`].

use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::BackendClient;
use crate::channel::{LinkMessage, ReturnFlags};
use crate::error::{LinkError, Result};
use crate::linker::LinkEnvironment;
use crate::pending::PendingProjects;
use crate::types::CloudProvider;

const MSG_INVALID_CALLBACK: &str = "Invalid callback";

/// Authorization outcome carried by the provider's redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| LinkError::InvalidCallback(e.to_string()))?;
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "state" => params.state = value,
                _ => {}
            }
        }
        Ok(params)
    }

    /// Provider error text, preferring the human-readable description.
    pub fn error_text(&self) -> Option<String> {
        self.error_description.clone().or_else(|| self.error.clone())
    }
}

/// How the outcome reached the primary window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Posted to the opener; this window was closed
    Posted,
    /// No opener; redirected in place to the given URL
    Redirected(String),
}

/// What the callback determined and how it was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReport {
    pub project_id: Option<String>,
    pub message: LinkMessage,
    pub delivery: Delivery,
}

impl CallbackReport {
    pub fn is_connected(&self) -> bool {
        matches!(self.message, LinkMessage::Connected { .. })
    }
}

/// Consent-window side of one provider's linking flow.
pub struct LinkCallbackHandler {
    api: BackendClient,
    env: LinkEnvironment,
    pending: PendingProjects,
}

impl LinkCallbackHandler {
    pub fn new(api: BackendClient, env: LinkEnvironment) -> Self {
        let pending = PendingProjects::new(&env, api.provider());
        Self { api, env, pending }
    }

    pub fn provider(&self) -> CloudProvider {
        self.api.provider()
    }

    /// Handle the window's current URL.
    pub async fn handle(&self) -> Result<CallbackReport> {
        let url = self.env.window_host.current_url();
        self.handle_url(&url).await
    }

    /// Handle the callback found in `url`. Never retries.
    #[instrument(skip(self, url), fields(provider = %self.provider()))]
    pub async fn handle_url(&self, url: &str) -> Result<CallbackReport> {
        let params = CallbackParams::from_url(url)?;
        let project_id = self.resolve_project(&params).await;
        let message = self.outcome(&params, project_id.as_deref()).await;

        if let Some(project_id) = &project_id {
            if let Err(e) = self.pending.remove(project_id).await {
                debug!("Could not clear pending project: {}", e);
            }
        }

        let delivery = self.report(&message, project_id.as_deref())?;
        Ok(CallbackReport {
            project_id,
            message,
            delivery,
        })
    }

    /// Project from `state`, which the backend's consent URL sets to the
    /// project id. Without it, the provider's only pending project.
    async fn resolve_project(&self, params: &CallbackParams) -> Option<String> {
        if let Some(state) = &params.state {
            return Some(state.clone());
        }
        match self.pending.sole().await {
            Ok(Some(project_id)) => Some(project_id),
            Ok(None) => {
                warn!("Callback without state and no single pending project");
                None
            }
            Err(e) => {
                warn!("Could not read pending projects: {}", e);
                None
            }
        }
    }

    async fn outcome(&self, params: &CallbackParams, project_id: Option<&str>) -> LinkMessage {
        if let Some(error) = params.error_text() {
            warn!("Provider denied authorization: {}", error);
            return LinkMessage::Error { error };
        }

        let (Some(code), Some(project_id)) = (params.code.as_deref(), project_id) else {
            warn!(
                has_code = params.code.is_some(),
                has_project = project_id.is_some(),
                "Callback is missing its code or project"
            );
            return LinkMessage::Error {
                error: MSG_INVALID_CALLBACK.to_string(),
            };
        };

        match self.api.authorize(project_id, code).await {
            Ok(account) => {
                info!(project_id, "Authorization code exchanged");
                LinkMessage::Connected {
                    email: account.email,
                }
            }
            Err(e) => {
                warn!(project_id, "Code exchange failed: {}", e);
                LinkMessage::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    fn report(&self, message: &LinkMessage, project_id: Option<&str>) -> Result<Delivery> {
        let window = &self.env.window_host;

        if let Some(opener) = window.opener() {
            match opener.post_message(message.to_value()?, &self.env.app_origin) {
                Ok(()) => {
                    debug!("Outcome posted to opener");
                    window.close();
                    return Ok(Delivery::Posted);
                }
                Err(e) => warn!("Posting to opener failed, redirecting instead: {}", e),
            }
        }

        let mut flags = ReturnFlags::from(message).for_provider(self.provider());
        flags.project_id = project_id.map(str::to_string);
        let target = flags.apply_to(&self.env.return_url)?;
        window.redirect(&target)?;
        debug!("Outcome delivered by redirect");
        Ok(Delivery::Redirected(target))
    }
}
