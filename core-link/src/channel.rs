//! # Cross-Window Channel
//!
//! Contract between the consent callback window and the primary window.
//!
//! - [`LinkMessage`] is the typed envelope posted to the opener
//!   (`{"type":"CONNECTED","email":..}` or `{"type":"ERROR","error":..}`).
//! - [`OriginGuard`] sits in front of the primary window's listener and only
//!   lets through messages from the application's own origin.
//! - [`ReturnFlags`] is the redirect fallback used when the callback window
//!   has no opener.

use bridge_traits::WindowMessage;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LinkError, Result};
use crate::types::CloudProvider;

/// Outcome reported by the callback window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkMessage {
    Connected {
        #[serde(default)]
        email: Option<String>,
    },
    Error {
        #[serde(default)]
        error: String,
    },
}

impl LinkMessage {
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| LinkError::MalformedMessage(e.to_string()))
    }
}

/// Filters incoming window messages by exact origin match.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    origin: String,
}

impl OriginGuard {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Decode `message` if it comes from the trusted origin.
    pub fn accept(&self, message: &WindowMessage) -> Result<LinkMessage> {
        if message.origin != self.origin {
            return Err(LinkError::UntrustedOrigin {
                origin: message.origin.clone(),
            });
        }
        serde_json::from_value(message.data.clone())
            .map_err(|e| LinkError::MalformedMessage(e.to_string()))
    }
}

/// Query flags carried by the redirect fallback.
///
/// `provider` names the linker the outcome belongs to; flags without it
/// cannot settle an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnFlags {
    pub connected: bool,
    pub provider: Option<CloudProvider>,
    pub project_id: Option<String>,
    pub error: Option<String>,
}

impl ReturnFlags {
    pub fn connected(project_id: &str) -> Self {
        Self {
            connected: true,
            provider: None,
            project_id: Some(project_id.to_string()),
            error: None,
        }
    }

    pub fn failed(project_id: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            connected: false,
            provider: None,
            project_id: project_id.map(str::to_string),
            error: Some(error.into()),
        }
    }

    pub fn for_provider(mut self, provider: CloudProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Read the flags from a URL. `None` when the URL carries no
    /// `connected` flag. An unknown provider segment is dropped.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let mut connected = None;
        let mut provider = None;
        let mut project_id = None;
        let mut error = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "connected" => connected = Some(value == "true"),
                "provider" => provider = CloudProvider::from_segment(&value),
                "projectId" if !value.is_empty() => project_id = Some(value.into_owned()),
                "error" if !value.is_empty() => error = Some(value.into_owned()),
                _ => {}
            }
        }

        Some(Self {
            connected: connected?,
            provider,
            project_id,
            error,
        })
    }

    /// `base` with the flags appended to its query.
    pub fn apply_to(&self, base: &str) -> Result<String> {
        let mut url = Url::parse(base).map_err(|e| LinkError::InvalidCallback(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("connected", if self.connected { "true" } else { "false" });
            if let Some(provider) = self.provider {
                query.append_pair("provider", provider.path_segment());
            }
            if let Some(project_id) = &self.project_id {
                query.append_pair("projectId", project_id);
            }
            if let Some(error) = &self.error {
                query.append_pair("error", error);
            }
        }
        Ok(url.into())
    }
}

impl From<&LinkMessage> for ReturnFlags {
    fn from(message: &LinkMessage) -> Self {
        match message {
            LinkMessage::Connected { .. } => Self {
                connected: true,
                provider: None,
                project_id: None,
                error: None,
            },
            LinkMessage::Error { error } => Self {
                connected: false,
                provider: None,
                project_id: None,
                error: Some(error.clone()),
            },
        }
    }
}
