//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges held by a [`ClientConfig`]
//! (identity provider, window, HTTP, settings) into the identity and
//! cloud-storage linking components, sharing one event bus between them.
//! Desktop hosts typically enable the `desktop-shims` feature, which fills in
//! `bridge-desktop` defaults for the HTTP client and the settings store.
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use core_runtime::logging::{init_logging, LoggingConfig};
//! use core_service::{ClientCore, Route};
//!
//! init_logging(LoggingConfig::default())?;
//! let config = ClientConfig::builder()
//!     .identity_provider(identity)
//!     .window_host(window)
//!     .build()?;
//! let core = ClientCore::bootstrap(config).await?;
//!
//! match core.route(&Route::from_path("/projects")) { /* ... */ }
//! ```

pub mod error;
pub mod routing;

pub use error::{CoreError, Result};
pub use routing::{Route, RouteDecision, RouteGuard, HOME_PATH, LOGIN_PATH};

pub use core_auth::{CredentialNegotiator, Session, SessionStore};
pub use core_link::{
    CloudProvider, ConnectionStatusStore, ExternalStorageLinker, LinkCallbackHandler,
    RemoteFolderBrowser, ReturnFlags,
};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::{MemorySettingsStore, ReqwestHttpClient};

use core_link::{BackendClient, LinkEnvironment, LinkError};
use core_runtime::config::ClientConfig;
use core_runtime::events::{EventBus, EventStream};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Linking components for one cloud provider.
struct ProviderLink {
    api: BackendClient,
    status: ConnectionStatusStore,
    linker: Arc<ExternalStorageLinker>,
}

/// Primary façade exposed to host applications.
pub struct ClientCore {
    config: ClientConfig,
    event_bus: EventBus,
    session: Arc<SessionStore>,
    negotiator: Arc<CredentialNegotiator>,
    links: HashMap<CloudProvider, ProviderLink>,
}

impl ClientCore {
    /// Wire every component. The session store is not started yet.
    pub fn new(config: ClientConfig) -> Self {
        let event_bus = EventBus::default();
        let session = Arc::new(SessionStore::new(
            Arc::clone(&config.identity_provider),
            event_bus.clone(),
        ));
        let negotiator = Arc::new(CredentialNegotiator::new(Arc::clone(
            &config.identity_provider,
        )));
        let env = LinkEnvironment::from_config(&config);

        let links = CloudProvider::ALL
            .into_iter()
            .map(|provider| {
                let api = BackendClient::new(
                    Arc::clone(&config.http_client),
                    session.clone(),
                    config.api_base_str(),
                    provider,
                );
                let status = ConnectionStatusStore::new(api.clone(), event_bus.clone());
                let linker = Arc::new(ExternalStorageLinker::new(
                    api.clone(),
                    status.clone(),
                    env.clone(),
                    event_bus.clone(),
                ));
                (
                    provider,
                    ProviderLink {
                        api,
                        status,
                        linker,
                    },
                )
            })
            .collect();

        Self {
            config,
            event_bus,
            session,
            negotiator,
            links,
        }
    }

    /// Wire every component and start following the identity provider's
    /// session changes.
    pub async fn bootstrap(config: ClientConfig) -> Result<Self> {
        let core = Self::new(config);
        core.session.start().await?;
        info!(api_base = %core.config.api_base_str(), "Client core started");
        Ok(core)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn session_store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.session)
    }

    pub fn session(&self) -> Session {
        self.session.current_session()
    }

    pub fn session_updates(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn negotiator(&self) -> Arc<CredentialNegotiator> {
        Arc::clone(&self.negotiator)
    }

    /// Decide what to show for `requested` given the current session.
    pub fn route(&self, requested: &Route) -> RouteDecision {
        RouteGuard::resolve(&self.session(), requested)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await?;
        Ok(())
    }

    fn link(&self, provider: CloudProvider) -> &ProviderLink {
        // Every provider in CloudProvider::ALL is wired in `new`.
        &self.links[&provider]
    }

    pub fn linker(&self, provider: CloudProvider) -> Arc<ExternalStorageLinker> {
        Arc::clone(&self.link(provider).linker)
    }

    pub fn status_store(&self, provider: CloudProvider) -> ConnectionStatusStore {
        self.link(provider).status.clone()
    }

    pub fn folder_browser(
        &self,
        provider: CloudProvider,
        project_id: impl Into<String>,
    ) -> RemoteFolderBrowser {
        let link = self.link(provider);
        RemoteFolderBrowser::new(project_id, link.api.clone(), link.status.clone())
    }

    /// Handler for a consent window of `provider`.
    pub fn callback_handler(&self, provider: CloudProvider) -> LinkCallbackHandler {
        LinkCallbackHandler::new(
            self.link(provider).api.clone(),
            LinkEnvironment::from_config(&self.config),
        )
    }

    /// Apply redirect fallback flags found in the window's current URL.
    ///
    /// Flags naming a provider go to that provider's linker only. Flags
    /// without one cannot settle an attempt, so every linker just refreshes
    /// the project's record; a provider whose refresh fails is logged and
    /// skipped.
    pub async fn reconcile_return(&self) -> Result<Option<ReturnFlags>> {
        let url = self.config.window_host.current_url();
        let Some(flags) = ReturnFlags::from_url(&url) else {
            return Ok(None);
        };

        if let Some(provider) = flags.provider {
            return Ok(self.link(provider).linker.reconcile_return(&url).await?);
        }

        for provider in CloudProvider::ALL {
            match self.link(provider).linker.reconcile_return(&url).await {
                Ok(_) => {}
                Err(LinkError::MissingProject) => return Err(LinkError::MissingProject.into()),
                Err(e) => warn!(provider = %provider, "Return reconciliation failed: {}", e),
            }
        }
        Ok(Some(flags))
    }

    /// Stop background work. Pending link attempts are abandoned.
    pub async fn shutdown(&self) {
        for provider in CloudProvider::ALL {
            let linker = &self.link(provider).linker;
            for project_id in linker.pending_projects().await {
                linker.cancel(&project_id).await;
            }
        }
        self.session.shutdown().await;
        info!("Client core stopped");
    }
}
