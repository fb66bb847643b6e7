//! Browser Window Abstraction
//!
//! The linking flow spans two window contexts: the primary application window
//! and a secondary popup that visits the provider's consent screen. Everything
//! the core needs from either window goes through [`WindowHost`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Geometry and chrome of a secondary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub toolbar: bool,
    pub menubar: bool,
    pub location: bool,
}

impl PopupFeatures {
    /// Popup with the given size, no toolbar or menubar, location bar shown.
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            toolbar: false,
            menubar: false,
            location: true,
        }
    }

    /// Feature string in `window.open` syntax.
    pub fn to_feature_string(&self) -> String {
        fn flag(value: bool) -> &'static str {
            if value {
                "yes"
            } else {
                "no"
            }
        }

        format!(
            "width={},height={},toolbar={},menubar={},location={}",
            self.width,
            self.height,
            flag(self.toolbar),
            flag(self.menubar),
            flag(self.location)
        )
    }
}

impl Default for PopupFeatures {
    fn default() -> Self {
        Self::sized(800, 900)
    }
}

/// A cross-window message as received by the primary window.
///
/// `origin` is supplied by the host and cannot be forged by the sender;
/// `data` is untrusted.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

impl WindowMessage {
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Registered message listener. Dropping it removes the listener.
#[async_trait]
pub trait MessageListener: Send {
    /// Next message delivered to the window, or `None` once the window is gone.
    async fn recv(&mut self) -> Option<WindowMessage>;
}

/// Handle to a secondary window opened by this one.
pub trait PopupHandle: Send + Sync {
    /// Whether the user (or the popup itself) has closed the window.
    fn is_closed(&self) -> bool;

    /// Close the window. No-op when already closed.
    fn close(&self);
}

/// Reference to the window that opened this one.
pub trait OpenerHandle: Send + Sync {
    /// Post a message that is only delivered if the opener's origin equals
    /// `target_origin`.
    fn post_message(&self, data: serde_json::Value, target_origin: &str) -> Result<()>;
}

/// Window capabilities of the host.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::window::{PopupFeatures, WindowHost};
///
/// fn open(host: &dyn WindowHost, url: &str) -> bool {
///     host.open_popup(url, "onedrive_auth", &PopupFeatures::default())
///         .is_some()
/// }
/// ```
#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Origin of this window (scheme, host and port; no trailing slash).
    fn origin(&self) -> String;

    /// Full URL this window is currently showing.
    fn current_url(&self) -> String;

    /// Open a secondary window. Returns `None` when the host blocked it.
    fn open_popup(
        &self,
        url: &str,
        name: &str,
        features: &PopupFeatures,
    ) -> Option<Box<dyn PopupHandle>>;

    /// Start listening for cross-window messages.
    fn add_message_listener(&self) -> Box<dyn MessageListener>;

    /// The window that opened this one, if any and still reachable.
    fn opener(&self) -> Option<Box<dyn OpenerHandle>>;

    /// Ask the user a yes/no question.
    async fn confirm(&self, prompt: &str) -> bool;

    /// Navigate this window in place.
    fn redirect(&self, url: &str) -> Result<()>;

    /// Close this window.
    fn close(&self);
}
