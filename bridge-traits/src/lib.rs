//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host.
//!
//! ## Overview
//!
//! This crate defines the contract between the client core and host-specific
//! implementations. Each trait represents a capability that the core requires
//! but that must be implemented differently per host (browser/WASM shell,
//! desktop webview, tests).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP calls to the application backend
//!
//! ### Identity
//! - [`IdentityProvider`](identity::IdentityProvider) - Opaque identity-provider SDK
//! - [`TokenSource`](identity::TokenSource) - Bearer tokens for authenticated calls
//!
//! ### Windows
//! - [`WindowHost`](window::WindowHost) - Popups, cross-window messages, redirects
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Key-value store shared across windows
//!
//! ## Host Requirements
//!
//! | Host    | Implementation Crate | Status |
//! |---------|----------------------|--------|
//! | Desktop | `bridge-desktop`     | ✅ HTTP, settings |
//! | Web     | TBD                  | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! let window_host = config.window_host
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "WindowHost".to_string(),
//!         message: "No window host provided. Inject the host's window adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so they can be shared across
//! async tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod identity;
pub mod storage;
pub mod window;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use identity::{
    FederatedProvider, IdentityError, IdentityProvider, IdentityResult, SessionChange,
    SessionChangeStream, TokenSource, UserRecord, PASSWORD_METHOD,
};
pub use storage::SettingsStore;
pub use window::{
    MessageListener, OpenerHandle, PopupFeatures, PopupHandle, WindowHost, WindowMessage,
};
