//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SettingsStore` as a process-local map shared by every window of the
//!   embedding webview
//!
//! Identity and window capabilities are always injected by the host shell;
//! there is no desktop default for them.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{MemorySettingsStore, ReqwestHttpClient};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let settings = MemorySettingsStore::new();
//! ```

mod http;
mod settings;

pub use http::ReqwestHttpClient;
pub use settings::MemorySettingsStore;
