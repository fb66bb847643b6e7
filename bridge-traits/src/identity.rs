//! Identity Provider Abstraction
//!
//! The identity provider (token issuance, popup-based federated sign-in,
//! session change notifications) is an opaque host capability. The core only
//! sees the surface below; SDK-specific error codes travel through
//! [`IdentityError`] unchanged and are interpreted by `core-auth`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::Result as BridgeResult;

/// Sign-in method identifier used by the provider for email/password accounts.
pub const PASSWORD_METHOD: &str = "password";

/// Federated identity providers offered on the sign-in screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FederatedProvider {
    Google,
    GitHub,
}

impl FederatedProvider {
    /// All federated providers, in the order the sign-in screen checks them.
    pub const ALL: [FederatedProvider; 2] = [FederatedProvider::Google, FederatedProvider::GitHub];

    /// Human-readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "Google",
            FederatedProvider::GitHub => "GitHub",
        }
    }

    /// Sign-in method identifier as reported by the provider SDK.
    pub fn method_id(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "google.com",
            FederatedProvider::GitHub => "github.com",
        }
    }

    /// Parse a provider SDK sign-in method identifier.
    pub fn from_method_id(id: &str) -> Option<Self> {
        match id {
            "google.com" => Some(FederatedProvider::Google),
            "github.com" => Some(FederatedProvider::GitHub),
            _ => None,
        }
    }

    /// OAuth scopes requested on top of the provider defaults.
    pub fn extra_scopes(&self) -> &'static [&'static str] {
        match self {
            FederatedProvider::Google => &[],
            FederatedProvider::GitHub => &["read:user"],
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// User record as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Provider-assigned stable user id
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    /// Method id used for the current sign-in ("password", "google.com", ...)
    pub sign_in_method: String,
}

/// Notification delivered by the provider's session-change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(UserRecord),
    SignedOut,
}

/// Provider-level failure carrying the SDK error code (e.g. `auth/wrong-password`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct IdentityError {
    pub code: String,
    pub message: String,
}

impl IdentityError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

/// Stream of session-change notifications. Dropping it unsubscribes.
#[async_trait]
pub trait SessionChangeStream: Send {
    /// Next notification, or `None` once the provider closed the stream.
    async fn next(&mut self) -> Option<SessionChange>;
}

/// Identity provider SDK surface consumed by the core.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::identity::{IdentityProvider, FederatedProvider};
///
/// async fn social(provider: &dyn IdentityProvider) {
///     match provider.sign_in_with_popup(FederatedProvider::Google).await {
///         Ok(user) => println!("signed in as {}", user.uid),
///         Err(err) => println!("failed: {}", err.code),
///     }
/// }
/// ```
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to session changes. The current state is delivered first.
    fn subscribe_session_changes(&self) -> Box<dyn SessionChangeStream>;

    /// Reload the user's profile from the provider, bypassing cached state.
    async fn reload_user(&self, user: &UserRecord) -> IdentityResult<UserRecord>;

    /// ID token of the signed-in user, optionally forcing a refresh.
    async fn id_token(&self, force_refresh: bool) -> IdentityResult<String>;

    /// Popup-based federated sign-in.
    async fn sign_in_with_popup(&self, provider: FederatedProvider) -> IdentityResult<UserRecord>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> IdentityResult<UserRecord>;

    /// Create an email/password account. The new user is signed in afterwards.
    async fn create_user(&self, email: &str, password: &str) -> IdentityResult<UserRecord>;

    async fn send_email_verification(&self, user: &UserRecord) -> IdentityResult<()>;

    async fn sign_out(&self) -> IdentityResult<()>;

    /// Sign-in method ids already bound to an email address.
    async fn fetch_sign_in_methods(&self, email: &str) -> IdentityResult<Vec<String>>;
}

/// Source of bearer tokens for authenticated backend calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A freshly issued bearer token for the current user.
    async fn bearer_token(&self) -> BridgeResult<String>;
}
