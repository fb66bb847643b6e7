//! Error types for cloud-storage linking

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Linking failures.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A non-terminal attempt already exists for the project
    #[error("A link attempt is already in progress for project {project_id}")]
    LinkInProgress { project_id: String },

    /// The host refused to open the consent window
    #[error("The consent window was blocked. Allow popups for this site and try again.")]
    PopupBlocked,

    /// A cross-window message came from an origin other than the app's own
    #[error("Message from untrusted origin {origin}")]
    UntrustedOrigin { origin: String },

    /// A cross-window message did not match the message contract
    #[error("Malformed link message: {0}")]
    MalformedMessage(String),

    /// The consent window was closed without a terminal signal
    #[error("The consent window was closed before the link was confirmed")]
    AmbiguousOutcome,

    /// The provider reported an error through the callback
    #[error("{0}")]
    ProviderRejected(String),

    /// The attempt was abandoned while it was being set up
    #[error("Link attempt for project {project_id} was cancelled")]
    Cancelled { project_id: String },

    /// Backend returned a non-success status
    #[error("Backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    /// Backend could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// Backend response could not be parsed
    #[error("Failed to parse backend response: {0}")]
    Parse(String),

    #[error("Missing project id")]
    MissingProject,

    #[error("Invalid callback URL: {0}")]
    InvalidCallback(String),

    #[error("Select at least one file to import")]
    EmptySelection,

    #[error("{id} is not a folder")]
    NotAFolder { id: String },

    #[error("No breadcrumb at position {index}")]
    InvalidCrumb { index: usize },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, LinkError>;
