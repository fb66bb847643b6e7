//! # External Storage Linker
//!
//! Opens the provider's consent screen in a secondary window and reconciles
//! its outcome into the project's connection record.
//!
//! ## Lifecycle
//!
//! 1. `connect` reserves an attempt (at most one non-terminal attempt per
//!    project), fetches the consent URL and opens the window.
//! 2. A monitor task owns the window's message listener and a poll timer.
//!    The first terminal signal wins; later messages or ticks are ignored.
//! 3. A closed window without a message leaves the attempt waiting. A late
//!    message can still complete it.
//! 4. `cancel`, a replacing attempt or dropping the linker aborts the
//!    monitor task, which releases the listener and the timer.

use bridge_traits::{MessageListener, PopupHandle, SettingsStore, WindowHost};
use core_runtime::config::{ClientConfig, LinkSettings};
use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::BackendClient;
use crate::channel::{LinkMessage, OriginGuard, ReturnFlags};
use crate::error::{LinkError, Result};
use crate::pending::PendingProjects;
use crate::status::ConnectionStatusStore;
use crate::types::{CloudProvider, LinkSessionSnapshot, LinkStatus};

/// Host capabilities and settings shared by the linker and the callback
/// handler.
#[derive(Clone)]
pub struct LinkEnvironment {
    pub window_host: Arc<dyn WindowHost>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub settings: LinkSettings,
    /// Origin of the primary window, `scheme://host[:port]`
    pub app_origin: String,
    /// Absolute URL the callback window falls back to
    pub return_url: String,
}

impl LinkEnvironment {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            window_host: Arc::clone(&config.window_host),
            settings_store: Arc::clone(&config.settings_store),
            settings: config.link.clone(),
            app_origin: config.app_origin_str(),
            return_url: config.return_url(),
        }
    }
}

/// Aborts the monitor task when the owning attempt goes away.
struct MonitorGuard(JoinHandle<()>);

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Attempt {
    snapshot: LinkSessionSnapshot,
    popup: Option<Arc<dyn PopupHandle>>,
    monitor: Option<MonitorGuard>,
    updates: watch::Sender<LinkSessionSnapshot>,
}

impl Attempt {
    fn publish(&self) {
        self.updates.send_replace(self.snapshot.clone());
    }

    fn forget_popup(&mut self, close: bool) {
        if let Some(popup) = self.popup.take() {
            if close {
                popup.close();
            }
        }
    }
}

struct Inner {
    provider: CloudProvider,
    api: BackendClient,
    status: ConnectionStatusStore,
    env: LinkEnvironment,
    pending: PendingProjects,
    event_bus: EventBus,
    attempts: Mutex<HashMap<String, Attempt>>,
}

/// Links projects to one cloud-storage provider.
pub struct ExternalStorageLinker {
    inner: Arc<Inner>,
}

impl ExternalStorageLinker {
    pub fn new(
        api: BackendClient,
        status: ConnectionStatusStore,
        env: LinkEnvironment,
        event_bus: EventBus,
    ) -> Self {
        let pending = PendingProjects::new(&env, api.provider());
        Self {
            inner: Arc::new(Inner {
                provider: api.provider(),
                api,
                status,
                env,
                pending,
                event_bus,
                attempts: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn provider(&self) -> CloudProvider {
        self.inner.provider
    }

    pub fn status_store(&self) -> &ConnectionStatusStore {
        &self.inner.status
    }

    /// Current attempt for `project_id`, if any.
    pub async fn session(&self, project_id: &str) -> Option<LinkSessionSnapshot> {
        self.inner
            .attempts
            .lock()
            .await
            .get(project_id)
            .map(|a| a.snapshot.clone())
    }

    /// Follow the current attempt for `project_id`. The receiver closes when
    /// the attempt is replaced, cancelled or forgotten.
    pub async fn subscribe(&self, project_id: &str) -> Option<watch::Receiver<LinkSessionSnapshot>> {
        self.inner
            .attempts
            .lock()
            .await
            .get(project_id)
            .map(|a| a.updates.subscribe())
    }

    /// Start linking `project_id`.
    ///
    /// Returns the attempt once the consent window is open. The outcome
    /// arrives later through [`session`](Self::session),
    /// [`subscribe`](Self::subscribe) and the event bus.
    #[instrument(skip(self), fields(provider = %self.inner.provider))]
    pub async fn connect(&self, project_id: &str) -> Result<LinkSessionSnapshot> {
        if project_id.trim().is_empty() {
            return Err(LinkError::MissingProject);
        }
        let attempt_id = self.inner.reserve(project_id).await?;

        match self.open(project_id, &attempt_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let released = self.inner.release(project_id, &attempt_id).await;
                // A cancel racing the registration leaves no attempt behind.
                if released || self.session(project_id).await.is_none() {
                    self.inner.clear_pending(project_id).await;
                }
                Err(e)
            }
        }
    }

    async fn open(&self, project_id: &str, attempt_id: &str) -> Result<LinkSessionSnapshot> {
        let inner = &self.inner;
        let auth_url = inner.api.auth_url(project_id).await?;
        inner.pending.add(project_id).await?;

        inner
            .update(project_id, attempt_id, |attempt| {
                attempt.snapshot.status = LinkStatus::Opening;
            })
            .await
            .ok_or_else(|| LinkError::Cancelled {
                project_id: project_id.to_string(),
            })?;

        let popup = inner.env.window_host.open_popup(
            &auth_url,
            &inner.provider.window_name(),
            &inner.env.settings.popup,
        );
        let Some(popup) = popup else {
            warn!(project_id, "Consent window blocked");
            inner.emit(LinkEvent::PopupBlocked {
                project_id: project_id.to_string(),
                provider: inner.segment(),
            });
            return Err(LinkError::PopupBlocked);
        };
        let popup: Arc<dyn PopupHandle> = Arc::from(popup);

        let snapshot = inner
            .update(project_id, attempt_id, |attempt| {
                attempt.snapshot.status = LinkStatus::AwaitingCallback;
                attempt.popup = Some(Arc::clone(&popup));
            })
            .await;
        let Some(snapshot) = snapshot else {
            popup.close();
            return Err(LinkError::Cancelled {
                project_id: project_id.to_string(),
            });
        };

        let listener = inner.env.window_host.add_message_listener();
        let monitor = MonitorGuard(tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            project_id.to_string(),
            attempt_id.to_string(),
            listener,
            popup,
        )));
        inner.attach_monitor(project_id, attempt_id, monitor).await;

        info!(project_id, attempt_id, "Consent window opened");
        inner.emit(LinkEvent::AttemptStarted {
            project_id: project_id.to_string(),
            provider: inner.segment(),
            attempt_id: attempt_id.to_string(),
        });
        Ok(snapshot)
    }

    /// Abandon the non-terminal attempt for `project_id`.
    ///
    /// Returns `false` when there was nothing to cancel.
    #[instrument(skip(self), fields(provider = %self.inner.provider))]
    pub async fn cancel(&self, project_id: &str) -> bool {
        let inner = &self.inner;
        let removed = {
            let mut attempts = inner.attempts.lock().await;
            match attempts.get(project_id) {
                Some(attempt) if !attempt.snapshot.status.is_terminal() => {
                    attempts.remove(project_id)
                }
                _ => None,
            }
        };
        let Some(mut attempt) = removed else {
            return false;
        };

        attempt.forget_popup(true);
        drop(attempt.monitor.take());
        inner.clear_pending(project_id).await;

        info!(project_id, "Link attempt cancelled");
        inner.emit(LinkEvent::Cancelled {
            project_id: project_id.to_string(),
            provider: inner.segment(),
            attempt_id: attempt.snapshot.attempt_id,
        });
        true
    }

    /// Drop a finished attempt. Non-terminal attempts are left alone.
    pub async fn forget(&self, project_id: &str) -> bool {
        let mut attempts = self.inner.attempts.lock().await;
        match attempts.get(project_id) {
            Some(attempt) if attempt.snapshot.status.is_terminal() => {
                attempts.remove(project_id);
                true
            }
            _ => false,
        }
    }

    /// Projects with an attempt still in flight.
    pub async fn pending_projects(&self) -> Vec<String> {
        let attempts = self.inner.attempts.lock().await;
        let mut projects: Vec<String> = attempts
            .iter()
            .filter(|(_, attempt)| !attempt.snapshot.status.is_terminal())
            .map(|(project_id, _)| project_id.clone())
            .collect();
        projects.sort();
        projects
    }

    /// Revoke the link after the user confirms.
    ///
    /// Returns `false` when the user declined. The local record is only
    /// reset once the backend accepted the revocation.
    #[instrument(skip(self), fields(provider = %self.inner.provider))]
    pub async fn disconnect(&self, project_id: &str) -> Result<bool> {
        let inner = &self.inner;
        let prompt = format!(
            "Disconnect {} from this project? Imported files are kept.",
            inner.provider.display_name()
        );
        if !inner.env.window_host.confirm(&prompt).await {
            debug!(project_id, "Disconnect declined");
            return Ok(false);
        }

        inner.api.disconnect(project_id).await?;
        inner.status.mark_disconnected(project_id).await;

        info!(project_id, "Cloud storage disconnected");
        inner.emit(LinkEvent::Disconnected {
            project_id: project_id.to_string(),
            provider: inner.segment(),
        });
        Ok(true)
    }

    /// Apply the redirect fallback flags found in `url`, if any.
    ///
    /// Flags naming another provider are left alone (`None`). Flags naming
    /// this provider settle its pending attempt for the project with the
    /// reported outcome. Flags naming no provider cannot be attributed, so
    /// they only refresh the connection record.
    #[instrument(skip(self, url), fields(provider = %self.inner.provider))]
    pub async fn reconcile_return(&self, url: &str) -> Result<Option<ReturnFlags>> {
        let Some(flags) = ReturnFlags::from_url(url) else {
            return Ok(None);
        };
        if flags.provider.is_some_and(|p| p != self.inner.provider) {
            return Ok(None);
        }
        let Some(project_id) = flags.project_id.clone() else {
            warn!("Return flags without project id");
            return Err(LinkError::MissingProject);
        };

        let pending = self
            .session(&project_id)
            .await
            .filter(|s| !s.status.is_terminal() && flags.provider.is_some());
        if let Some(pending) = pending {
            let message = if flags.connected {
                LinkMessage::Connected { email: None }
            } else {
                LinkMessage::Error {
                    error: flags
                        .error
                        .clone()
                        .unwrap_or_else(|| "Connection failed".to_string()),
                }
            };
            if self
                .inner
                .settle(&project_id, &pending.attempt_id, message)
                .await
            {
                self.inner
                    .detach_monitor(&project_id, &pending.attempt_id)
                    .await;
            }
        }

        info!(
            project_id = %project_id,
            connected = flags.connected,
            "Reconciled redirect return"
        );
        self.inner.status.refresh(&project_id).await?;
        Ok(Some(flags))
    }
}

impl Inner {
    fn segment(&self) -> String {
        self.provider.path_segment().to_string()
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_bus.emit(CoreEvent::Link(event));
    }

    /// Reserve an `Idle` attempt, replacing a finished one.
    async fn reserve(&self, project_id: &str) -> Result<String> {
        let mut attempts = self.attempts.lock().await;
        if let Some(existing) = attempts.get(project_id) {
            if !existing.snapshot.status.is_terminal() {
                debug!(project_id, "Link attempt already in progress");
                return Err(LinkError::LinkInProgress {
                    project_id: project_id.to_string(),
                });
            }
        }

        let attempt_id = Uuid::new_v4().to_string();
        let snapshot = LinkSessionSnapshot::reserved(project_id, self.provider, attempt_id.clone());
        let (updates, _) = watch::channel(snapshot.clone());
        attempts.insert(
            project_id.to_string(),
            Attempt {
                snapshot,
                popup: None,
                monitor: None,
                updates,
            },
        );
        Ok(attempt_id)
    }

    /// Hand the monitor to its attempt. Dropped (and so aborted) when the
    /// attempt was cancelled or replaced in the meantime.
    async fn attach_monitor(&self, project_id: &str, attempt_id: &str, monitor: MonitorGuard) {
        let mut attempts = self.attempts.lock().await;
        match attempts.get_mut(project_id) {
            Some(attempt) if attempt.snapshot.attempt_id == attempt_id => {
                attempt.monitor = Some(monitor);
            }
            _ => debug!(project_id, attempt_id, "Attempt gone before monitor attached"),
        }
    }

    /// Stop watching an attempt that was settled from outside its monitor.
    async fn detach_monitor(&self, project_id: &str, attempt_id: &str) {
        let monitor = {
            let mut attempts = self.attempts.lock().await;
            attempts
                .get_mut(project_id)
                .filter(|a| a.snapshot.attempt_id == attempt_id)
                .and_then(|a| a.monitor.take())
        };
        drop(monitor);
    }

    /// Remove the attempt if it is still the one identified by `attempt_id`.
    async fn release(&self, project_id: &str, attempt_id: &str) -> bool {
        let mut attempts = self.attempts.lock().await;
        if attempts
            .get(project_id)
            .is_some_and(|a| a.snapshot.attempt_id == attempt_id)
        {
            attempts.remove(project_id);
            return true;
        }
        false
    }

    async fn clear_pending(&self, project_id: &str) {
        if let Err(e) = self.pending.remove(project_id).await {
            debug!(project_id, "Could not clear pending project: {}", e);
        }
    }

    /// Mutate a non-terminal attempt identified by `attempt_id`.
    ///
    /// Returns the new snapshot, or `None` when the attempt is gone, was
    /// replaced or already reached a terminal state.
    async fn update<F>(&self, project_id: &str, attempt_id: &str, f: F) -> Option<LinkSessionSnapshot>
    where
        F: FnOnce(&mut Attempt),
    {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts.get_mut(project_id)?;
        if attempt.snapshot.attempt_id != attempt_id || attempt.snapshot.status.is_terminal() {
            return None;
        }
        f(attempt);
        attempt.publish();
        Some(attempt.snapshot.clone())
    }

    /// Apply a terminal message. Returns `true` when it was the first
    /// terminal signal for the attempt.
    async fn settle(&self, project_id: &str, attempt_id: &str, message: LinkMessage) -> bool {
        let applied = self
            .update(project_id, attempt_id, |attempt| match &message {
                LinkMessage::Connected { email } => {
                    attempt.snapshot.status = LinkStatus::Succeeded;
                    attempt.snapshot.account_email = email.clone();
                    attempt.forget_popup(true);
                }
                LinkMessage::Error { error } => {
                    attempt.snapshot.status = LinkStatus::Failed;
                    attempt.snapshot.error = Some(error.clone());
                    attempt.forget_popup(false);
                }
            })
            .await;
        let Some(snapshot) = applied else {
            debug!(project_id, attempt_id, "Ignoring signal for settled attempt");
            return false;
        };

        match message {
            LinkMessage::Connected { email } => {
                info!(project_id, attempt_id, "Cloud storage linked");
                self.emit(LinkEvent::Connected {
                    project_id: project_id.to_string(),
                    provider: self.segment(),
                    attempt_id: attempt_id.to_string(),
                    account_email: email,
                });
            }
            LinkMessage::Error { error } => {
                warn!(project_id, attempt_id, "Provider reported error: {}", error);
                self.emit(LinkEvent::Failed {
                    project_id: project_id.to_string(),
                    provider: self.segment(),
                    attempt_id: attempt_id.to_string(),
                    message: snapshot.error.unwrap_or(error),
                });
            }
        }
        true
    }

    /// Record that the window closed without a terminal message.
    async fn mark_popup_closed(&self, project_id: &str, attempt_id: &str) {
        let updated = self
            .update(project_id, attempt_id, |attempt| {
                attempt.snapshot.popup_closed = true;
                attempt.forget_popup(false);
            })
            .await;
        if updated.is_some() {
            info!(project_id, attempt_id, "Consent window closed without outcome");
            self.emit(LinkEvent::OutcomeAmbiguous {
                project_id: project_id.to_string(),
                provider: self.segment(),
                attempt_id: attempt_id.to_string(),
            });
        }
    }
}

/// Watches one attempt until it reaches a terminal state.
async fn monitor(
    inner: Weak<Inner>,
    project_id: String,
    attempt_id: String,
    mut listener: Box<dyn MessageListener>,
    popup: Arc<dyn PopupHandle>,
) {
    let (guard, poll_interval, settle_delay) = match inner.upgrade() {
        Some(inner) => (
            OriginGuard::new(inner.env.app_origin.clone()),
            inner.env.settings.poll_interval,
            inner.env.settings.settle_delay,
        ),
        None => return,
    };

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut polling = true;
    let mut listening = true;

    let connected = loop {
        tokio::select! {
            message = listener.recv(), if listening => {
                let Some(message) = message else {
                    debug!("Message listener closed");
                    listening = false;
                    if !polling {
                        return;
                    }
                    continue;
                };
                let message = match guard.accept(&message) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("Dropping window message: {}", e);
                        continue;
                    }
                };
                let Some(inner) = inner.upgrade() else { return };
                let connected = matches!(message, LinkMessage::Connected { .. });
                if inner.settle(&project_id, &attempt_id, message).await {
                    break connected;
                }
            }
            _ = ticker.tick(), if polling => {
                if popup.is_closed() {
                    polling = false;
                    let Some(inner) = inner.upgrade() else { return };
                    inner.mark_popup_closed(&project_id, &attempt_id).await;
                    if !listening {
                        return;
                    }
                }
            }
        }
    };
    drop(listener);

    if connected {
        tokio::time::sleep(settle_delay).await;
        let Some(inner) = inner.upgrade() else { return };
        if let Err(e) = inner.status.refresh(&project_id).await {
            warn!(project_id = %project_id, "Status refresh after link failed: {}", e);
        }
    }
}
