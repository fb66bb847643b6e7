use bridge_traits::identity::{FederatedProvider, UserRecord, PASSWORD_METHOD};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;

/// How a user proved their identity.
///
/// # Examples
///
/// ```
/// use core_auth::SignInMethod;
/// use bridge_traits::FederatedProvider;
///
/// assert_eq!(SignInMethod::from_id("password"), SignInMethod::Password);
/// assert_eq!(
///     SignInMethod::from_id("github.com"),
///     SignInMethod::Federated(FederatedProvider::GitHub)
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignInMethod {
    Password,
    Federated(FederatedProvider),
    /// A method the core does not know how to offer (phone, anonymous, ...)
    Other(String),
}

impl SignInMethod {
    pub fn from_id(id: &str) -> Self {
        if id == PASSWORD_METHOD {
            return SignInMethod::Password;
        }
        match FederatedProvider::from_method_id(id) {
            Some(provider) => SignInMethod::Federated(provider),
            None => SignInMethod::Other(id.to_string()),
        }
    }

    pub fn as_id(&self) -> &str {
        match self {
            SignInMethod::Password => PASSWORD_METHOD,
            SignInMethod::Federated(provider) => provider.method_id(),
            SignInMethod::Other(id) => id,
        }
    }
}

impl fmt::Display for SignInMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_id())
    }
}

/// Authenticated identity as published by the session store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub method: SignInMethod,
}

impl Identity {
    /// Password identities must have a verified email before they count as
    /// authenticated. Federated identities are vouched for by their provider.
    pub fn is_publishable(&self) -> bool {
        self.method != SignInMethod::Password || self.email_verified
    }
}

impl From<UserRecord> for Identity {
    fn from(user: UserRecord) -> Self {
        Self {
            method: SignInMethod::from_id(&user.sign_in_method),
            uid: user.uid,
            email: user.email,
            email_verified: user.email_verified,
            display_name: user.display_name,
        }
    }
}

// Email is personal data; keep it out of Debug output.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uid", &self.uid)
            .field(
                "email",
                &self
                    .email
                    .as_deref()
                    .map(core_runtime::logging::redact_email),
            )
            .field("email_verified", &self.email_verified)
            .field("display_name", &self.display_name)
            .field("method", &self.method)
            .finish()
    }
}

/// Process-wide authentication state.
///
/// `is_loading` is true until the first session notification has been
/// processed and never becomes true again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    pub is_loading: bool,
}

impl Session {
    /// Initial state at application start.
    pub fn loading() -> Self {
        Self {
            identity: None,
            is_loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::loading()
    }
}

/// Current step of the credential negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Pick federated sign-in or the email path. `hint` names the provider
    /// the last email lookup pointed at.
    Choose { hint: Option<FederatedProvider> },
    /// Typing an email address.
    EmailEntry { draft: String },
    /// Typing a password for `email`. `is_existing_account` selects sign-in
    /// versus registration.
    PasswordEntry {
        email: String,
        is_existing_account: bool,
    },
}

impl NegotiationStep {
    pub fn initial() -> Self {
        NegotiationStep::Choose { hint: None }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NegotiationStep::Choose { .. } => "choose",
            NegotiationStep::EmailEntry { .. } => "email",
            NegotiationStep::PasswordEntry { .. } => "password",
        }
    }
}

impl Default for NegotiationStep {
    fn default() -> Self {
        Self::initial()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// Transient message shown next to the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
    /// The failure behind an error notice
    pub error: Option<AuthError>,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
            error: None,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
            error: None,
        }
    }

    /// Notice for a failure. Cancellation is informational.
    pub fn from_error(error: AuthError) -> Self {
        let kind = if error.is_cancellation() {
            NoticeKind::Info
        } else {
            NoticeKind::Error
        };
        Self {
            kind,
            text: error.to_string(),
            error: Some(error),
        }
    }
}

/// Where an email address should go next, derived from the sign-in methods
/// already bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailRoute {
    /// Only a federated method is bound; send the user back to that button.
    UseFederated(FederatedProvider),
    /// A password account exists.
    SignIn,
    /// Nothing usable is bound; register a new password account.
    Register,
}

/// Result of a successful password submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordOutcome {
    Authenticated(Identity),
    /// Account created and signed out again; the user must verify first.
    VerificationSent { email: String },
}

/// Read-only view of the negotiator for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiationSnapshot {
    pub step: NegotiationStep,
    pub notice: Option<Notice>,
}
