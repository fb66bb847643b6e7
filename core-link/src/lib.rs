//! # Cloud Storage Linking
//!
//! Per-project links to a third-party cloud-storage account (OneDrive,
//! Google Drive), authorized through the provider's consent screen in a
//! secondary window.
//!
//! ## Overview
//!
//! - [`ExternalStorageLinker`] opens the consent window from the primary
//!   window and watches it until the outcome is known.
//! - [`LinkCallbackHandler`] runs in the consent window, exchanges the
//!   authorization code and reports back.
//! - [`ConnectionStatusStore`] caches "linked, as whom, to which folder".
//! - [`RemoteFolderBrowser`] navigates the linked account and imports files.
//! - [`BackendClient`] is the typed REST client underneath all of them.

pub mod api;
pub mod browser;
pub mod callback;
pub mod channel;
pub mod error;
pub mod linker;
pub mod pending;
pub mod status;
pub mod types;

pub use api::BackendClient;
pub use browser::RemoteFolderBrowser;
pub use callback::{CallbackParams, CallbackReport, Delivery, LinkCallbackHandler};
pub use channel::{LinkMessage, OriginGuard, ReturnFlags};
pub use error::{LinkError, Result};
pub use linker::{ExternalStorageLinker, LinkEnvironment};
pub use pending::PendingProjects;
pub use status::ConnectionStatusStore;
pub use types::{
    AuthorizedAccount, Breadcrumb, CloudProvider, ConnectionRecord, LinkSessionSnapshot,
    LinkStatus, RemoteItem,
};
