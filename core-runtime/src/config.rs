//! # Client Configuration Module
//!
//! The configuration system uses a builder to construct a [`ClientConfig`]
//! holding every host bridge and setting the core needs. It fails fast when a
//! required bridge is missing or a value is invalid.
//!
//! ## Required Dependencies
//!
//! - `IdentityProvider` - identity-provider SDK surface
//! - `WindowHost` - popups, cross-window messages, redirects
//!
//! ## Dependencies with desktop defaults
//!
//! - `HttpClient` - backend calls (desktop default: reqwest)
//! - `SettingsStore` - state shared across windows (desktop default: in-memory)
//!
//! When the `desktop-shims` feature is enabled, these defaults are injected
//! automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::builder()
//!     .api_base_url("https://api.example.com/api")
//!     .app_origin("https://app.example.com")
//!     .identity_provider(Arc::new(MyIdentityProvider))
//!     .window_host(Arc::new(MyWindowHost))
//!     .http_client(Arc::new(MyHttpClient))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, IdentityProvider, PopupFeatures, SettingsStore, WindowHost};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Backend address used when none is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Settings for the cloud-storage linking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Geometry of the consent window
    pub popup: PopupFeatures,

    /// How often the linker checks whether the consent window was closed
    pub poll_interval: Duration,

    /// Delay between a successful callback and the status refresh, giving the
    /// backend time to persist the new link
    pub settle_delay: Duration,

    /// Path (relative to the app origin) the callback window redirects to
    /// when it has no opener
    pub return_path: String,

    /// Prefix of the per-provider settings entries listing the projects
    /// with a consent window open (`{prefix}:{provider}`).
    ///
    /// The callback window takes the project from the provider's `state`
    /// parameter, which the backend's consent URL must set to the project
    /// id. It only consults these entries when `state` is absent, and only
    /// when a single project is pending for the provider.
    pub pending_project_key: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            popup: PopupFeatures::default(),
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
            return_path: "/projects".to_string(),
            pending_project_key: "pending_link_project".to_string(),
        }
    }
}

impl LinkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.popup.width == 0 || self.popup.height == 0 {
            return Err(Error::Config(
                "Consent window size must be non-zero".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "Consent window poll interval must be greater than 0ms".to_string(),
            ));
        }

        if !self.return_path.starts_with('/') {
            return Err(Error::Config(format!(
                "Return path must be absolute, got '{}'",
                self.return_path
            )));
        }

        if self.pending_project_key.trim().is_empty() {
            return Err(Error::Config(
                "Pending project settings key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Client configuration.
///
/// Use [`ClientConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ClientConfig {
    /// Backend REST base URL, without trailing slash
    pub api_base_url: Url,

    /// Origin of the primary application window
    pub app_origin: Url,

    pub link: LinkSettings,

    pub identity_provider: Arc<dyn IdentityProvider>,

    pub http_client: Arc<dyn HttpClient>,

    pub window_host: Arc<dyn WindowHost>,

    pub settings_store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("app_origin", &self.app_origin_str())
            .field("link", &self.link)
            .field("identity_provider", &"IdentityProvider { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("window_host", &"WindowHost { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Base URL as a string without trailing slash, ready for path joins.
    pub fn api_base_str(&self) -> &str {
        self.api_base_url.as_str().trim_end_matches('/')
    }

    /// Application origin in `scheme://host[:port]` form.
    pub fn app_origin_str(&self) -> String {
        self.app_origin.origin().ascii_serialization()
    }

    /// Absolute URL of the page the callback window falls back to.
    pub fn return_url(&self) -> String {
        format!("{}{}", self.app_origin_str(), self.link.return_path)
    }
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn identity_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "IdentityProvider".to_string(),
        message: "IdentityProvider implementation is required for sign-in and bearer tokens. \
                 Inject the host's identity-provider SDK adapter."
            .to_string(),
    }
}

fn window_host_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "WindowHost".to_string(),
        message: "WindowHost implementation is required for the consent window flow. \
                 Web: inject the browser window adapter. \
                 Desktop: inject the webview shell adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to initialize default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for backend calls. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Web: inject a fetch-based client."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store() -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::MemorySettingsStore;

    let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store() -> Result<Arc<dyn SettingsStore>> {
    Err(Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to hand the pending project to the callback window. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default MemorySettingsStore. \
                 Web: inject a localStorage-based settings store."
            .to_string(),
    })
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_base_url: Option<String>,
    app_origin: Option<String>,
    link: Option<LinkSettings>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    http_client: Option<Arc<dyn HttpClient>>,
    window_host: Option<Arc<dyn WindowHost>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
}

impl ClientConfigBuilder {
    /// Sets the backend REST base URL.
    ///
    /// Default: `http://localhost:5000/api`
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the origin of the primary window. When omitted, the window host's
    /// own origin is used.
    pub fn app_origin(mut self, origin: impl Into<String>) -> Self {
        self.app_origin = Some(origin.into());
        self
    }

    /// Replaces all linking settings at once.
    pub fn link_settings(mut self, settings: LinkSettings) -> Self {
        self.link = Some(settings);
        self
    }

    /// Sets the consent window size.
    ///
    /// Default: 800×900
    pub fn popup_size(mut self, width: u32, height: u32) -> Self {
        let link = self.link.get_or_insert_with(LinkSettings::default);
        link.popup.width = width;
        link.popup.height = height;
        self
    }

    /// Sets the consent window poll interval.
    ///
    /// Default: 500 ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.link
            .get_or_insert_with(LinkSettings::default)
            .poll_interval = interval;
        self
    }

    /// Sets the delay between a successful callback and the status refresh.
    ///
    /// Default: 500 ms
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.link
            .get_or_insert_with(LinkSettings::default)
            .settle_delay = delay;
        self
    }

    /// Sets the identity provider implementation (required).
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the window host implementation (required).
    pub fn window_host(mut self, host: Arc<dyn WindowHost>) -> Self {
        self.window_host = Some(host);
        self
    }

    /// Sets the settings store implementation.
    ///
    /// If not provided, the in-memory desktop default is used when the
    /// `desktop-shims` feature is enabled.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Builds the final `ClientConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent
    /// - [`Error::InvalidUrl`] when the base URL or origin does not parse
    /// - [`Error::Config`] when a linking setting is invalid
    pub fn build(self) -> Result<ClientConfig> {
        let identity_provider = self
            .identity_provider
            .ok_or_else(identity_provider_missing_error)?;

        let window_host = self.window_host.ok_or_else(window_host_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store()?,
        };

        let api_base_url = parse_http_url(
            "api_base_url",
            self.api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE_URL),
        )?;

        let origin = self.app_origin.unwrap_or_else(|| window_host.origin());
        let app_origin = parse_http_url("app_origin", &origin)?;

        let link = self.link.unwrap_or_default();
        link.validate()?;

        Ok(ClientConfig {
            api_base_url,
            app_origin,
            link,
            identity_provider,
            http_client,
            window_host,
            settings_store,
        })
    }
}
