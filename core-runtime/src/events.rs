//! # Event Bus System
//!
//! Decoupled notifications between the identity and linking components using
//! `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ SessionStore ├────────────>│           │   subscribe   ┌────────────┐
//! └──────────────┘             │ EventBus  ├──────────────>│ Subscriber │
//! ┌──────────────┐    emit     │ (broadcast│               └────────────┘
//! │ Linker/Store ├────────────>│  channel) │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Session(SessionEvent::SignedOut)).ok();
//! assert_eq!(
//!     stream.recv().await.unwrap(),
//!     CoreEvent::Session(SessionEvent::SignedOut)
//! );
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! Emitting without subscribers returns an error which publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
    /// Cloud-storage linking events
    Link(LinkEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Link(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Link(LinkEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Link(LinkEvent::PopupBlocked { .. }) => EventSeverity::Warning,
            CoreEvent::Link(LinkEvent::OutcomeAmbiguous { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::UnverifiedRejected { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::SignedIn { .. }) => EventSeverity::Info,
            CoreEvent::Link(LinkEvent::Connected { .. }) => EventSeverity::Info,
            CoreEvent::Link(LinkEvent::Disconnected { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The first session notification was processed; loading is over.
    Resolved {
        authenticated: bool,
    },
    /// An identity was published.
    SignedIn {
        uid: String,
        /// Sign-in method id ("password", "google.com", ...)
        method: String,
    },
    /// The published identity was cleared.
    SignedOut,
    /// A password identity with an unverified email was withheld.
    UnverifiedRejected {
        uid: String,
    },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Resolved { .. } => "Session resolved",
            SessionEvent::SignedIn { .. } => "User signed in",
            SessionEvent::SignedOut => "User signed out",
            SessionEvent::UnverifiedRejected { .. } => "Unverified identity withheld",
        }
    }
}

// ============================================================================
// Link Events
// ============================================================================

/// Events related to linking a project with a cloud-storage account.
///
/// `provider` is the provider's path segment (`onedrive`, `google`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LinkEvent {
    /// The consent window was opened and the attempt awaits its callback.
    AttemptStarted {
        project_id: String,
        provider: String,
        attempt_id: String,
    },
    /// The host refused to open the consent window.
    PopupBlocked {
        project_id: String,
        provider: String,
    },
    /// The callback window reported a successful link.
    Connected {
        project_id: String,
        provider: String,
        attempt_id: String,
        account_email: Option<String>,
    },
    /// The callback window reported a provider error.
    Failed {
        project_id: String,
        provider: String,
        attempt_id: String,
        message: String,
    },
    /// The consent window was closed without reporting an outcome.
    OutcomeAmbiguous {
        project_id: String,
        provider: String,
        attempt_id: String,
    },
    /// The attempt was abandoned before it reached a terminal state.
    Cancelled {
        project_id: String,
        provider: String,
        attempt_id: String,
    },
    /// The cached connection record was re-read from the backend.
    StatusRefreshed {
        project_id: String,
        provider: String,
        connected: bool,
    },
    /// The link was revoked.
    Disconnected {
        project_id: String,
        provider: String,
    },
}

impl LinkEvent {
    fn description(&self) -> &str {
        match self {
            LinkEvent::AttemptStarted { .. } => "Link attempt started",
            LinkEvent::PopupBlocked { .. } => "Consent window blocked",
            LinkEvent::Connected { .. } => "Cloud storage linked",
            LinkEvent::Failed { .. } => "Cloud storage link failed",
            LinkEvent::OutcomeAmbiguous { .. } => "Consent window closed without outcome",
            LinkEvent::Cancelled { .. } => "Link attempt cancelled",
            LinkEvent::StatusRefreshed { .. } => "Connection status refreshed",
            LinkEvent::Disconnected { .. } => "Cloud storage unlinked",
        }
    }

    /// Project the event belongs to.
    pub fn project_id(&self) -> &str {
        match self {
            LinkEvent::AttemptStarted { project_id, .. }
            | LinkEvent::PopupBlocked { project_id, .. }
            | LinkEvent::Connected { project_id, .. }
            | LinkEvent::Failed { project_id, .. }
            | LinkEvent::OutcomeAmbiguous { project_id, .. }
            | LinkEvent::Cancelled { project_id, .. }
            | LinkEvent::StatusRefreshed { project_id, .. }
            | LinkEvent::Disconnected { project_id, .. } => project_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let link_events = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Link(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when no matching
    /// event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => match &self.filter {
                    Some(filter) if !filter(&event) => continue,
                    _ => return Some(Ok(event)),
                },
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
