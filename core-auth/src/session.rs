//! # Session Store
//!
//! Process-wide holder of the current authenticated identity.
//!
//! The store subscribes once to the identity provider's session-change stream
//! and is the only writer of the published [`Session`]. Every signed-in
//! notification is re-validated with a forced profile reload before it is
//! published, and a password identity whose email is not verified is never
//! published at all.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::SessionStore;
//! use core_runtime::events::EventBus;
//!
//! let store = SessionStore::new(identity_provider, EventBus::default());
//! store.start().await?;
//!
//! let mut sessions = store.subscribe();
//! sessions.wait_for(|s| !s.is_loading).await?;
//! println!("signed in: {}", store.current_session().is_authenticated());
//! ```

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::identity::{IdentityProvider, SessionChange, TokenSource};
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::types::{Identity, Session};

#[derive(Default)]
struct Subscription {
    started: bool,
    task: Option<JoinHandle<()>>,
}

/// Publishes the current session and supplies bearer tokens.
pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    event_bus: EventBus,
    sender: Arc<watch::Sender<Session>>,
    subscription: Mutex<Subscription>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>, event_bus: EventBus) -> Self {
        let (sender, _) = watch::channel(Session::loading());
        Self {
            provider,
            event_bus,
            sender: Arc::new(sender),
            subscription: Mutex::new(Subscription::default()),
        }
    }

    /// Subscribe to the provider's session changes.
    ///
    /// # Errors
    ///
    /// [`AuthError::AlreadyStarted`] when called more than once, including
    /// after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if subscription.started {
            return Err(AuthError::AlreadyStarted);
        }

        let mut changes = self.provider.subscribe_session_changes();
        let publisher = Publisher {
            provider: Arc::clone(&self.provider),
            event_bus: self.event_bus.clone(),
            sender: Arc::clone(&self.sender),
        };

        let task = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                publisher.apply(change).await;
            }
            debug!("Session change stream closed");
        });

        subscription.started = true;
        subscription.task = Some(task);
        info!("Session store started");
        Ok(())
    }

    /// Stop listening for session changes. The last published session stays
    /// readable.
    pub async fn shutdown(&self) {
        if let Some(task) = self.subscription.lock().await.task.take() {
            task.abort();
            info!("Session store stopped");
        }
    }

    /// Snapshot of the published session.
    pub fn current_session(&self) -> Session {
        self.sender.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.sender.subscribe()
    }

    /// Clear the published identity and sign out of the provider.
    ///
    /// The identity is cleared even when the provider call fails.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let previous = clear_identity(&self.sender);
        if let Some(identity) = previous {
            info!(uid = %identity.uid, "Signing out");
            let _ = self
                .event_bus
                .emit(CoreEvent::Session(SessionEvent::SignedOut));
        }

        self.provider.sign_out().await.map_err(|e| {
            warn!(code = %e.code, "Provider sign-out failed");
            AuthError::from_provider(&e)
        })
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Ok(mut subscription) = self.subscription.try_lock() {
            if let Some(task) = subscription.task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl TokenSource for SessionStore {
    /// Always forces a refresh so the backend never sees a stale token.
    async fn bearer_token(&self) -> BridgeResult<String> {
        if !self.current_session().is_authenticated() {
            return Err(BridgeError::NotAuthenticated(
                "No signed-in user".to_string(),
            ));
        }

        self.provider.id_token(true).await.map_err(|e| {
            warn!(code = %e.code, "ID token refresh failed");
            BridgeError::NotAuthenticated(e.message)
        })
    }
}

/// State shared with the subscription task.
struct Publisher {
    provider: Arc<dyn IdentityProvider>,
    event_bus: EventBus,
    sender: Arc<watch::Sender<Session>>,
}

impl Publisher {
    async fn apply(&self, change: SessionChange) {
        let identity = match change {
            SessionChange::SignedIn(user) => match self.provider.reload_user(&user).await {
                Ok(fresh) => {
                    let identity = Identity::from(fresh);
                    if identity.is_publishable() {
                        Some(identity)
                    } else {
                        debug!(uid = %identity.uid, "Withholding unverified password identity");
                        self.emit(SessionEvent::UnverifiedRejected {
                            uid: identity.uid.clone(),
                        });
                        None
                    }
                }
                Err(e) => {
                    warn!(uid = %user.uid, code = %e.code, "Profile reload failed; treating as signed out");
                    None
                }
            },
            SessionChange::SignedOut => None,
        };

        self.publish(identity);
    }

    fn publish(&self, identity: Option<Identity>) {
        let mut was_loading = false;
        let mut previous_uid = None;
        let next_uid = identity.as_ref().map(|i| i.uid.clone());
        let next_method = identity.as_ref().map(|i| i.method.to_string());

        self.sender.send_modify(|session| {
            was_loading = session.is_loading;
            previous_uid = session.identity.as_ref().map(|i| i.uid.clone());
            session.identity = identity;
            session.is_loading = false;
        });

        if was_loading {
            self.emit(SessionEvent::Resolved {
                authenticated: next_uid.is_some(),
            });
        }

        match (previous_uid, next_uid, next_method) {
            (previous, Some(uid), Some(method)) if previous.as_deref() != Some(uid.as_str()) => {
                info!(uid = %uid, method = %method, "Session published");
                self.emit(SessionEvent::SignedIn { uid, method });
            }
            (Some(_), None, _) => {
                info!("Session cleared");
                self.emit(SessionEvent::SignedOut);
            }
            _ => {}
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_bus.emit(CoreEvent::Session(event));
    }
}

/// Clear the identity, returning what was published before.
fn clear_identity(sender: &watch::Sender<Session>) -> Option<Identity> {
    let mut previous = None;
    sender.send_if_modified(|session| {
        previous = session.identity.take();
        previous.is_some()
    });
    previous
}
