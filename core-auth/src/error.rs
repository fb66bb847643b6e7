use bridge_traits::identity::{FederatedProvider, IdentityError};
use thiserror::Error;

/// Authentication failures.
///
/// `Display` renders the text shown to the user on the sign-in screen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login cancelled.")]
    Cancelled,

    /// The email is already bound to another sign-in method. `provider` names
    /// it when known.
    #[error("{}", account_conflict_message(.provider))]
    AccountConflict { provider: Option<FederatedProvider> },

    #[error("Incorrect password. Please try again.")]
    WrongPassword,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("Too many attempts. Please try again later.")]
    RateLimited,

    #[error("The sign-in window was blocked. Allow popups for this site and try again.")]
    PopupBlocked,

    #[error("Please verify your email before logging in. Check your inbox.")]
    Unverified,

    #[error("Invalid email address. Please try again.")]
    InvalidEmail,

    #[error("Network error. Check your connection and try again.")]
    NetworkFailure,

    #[error("Error: {0}")]
    Other(String),

    #[error("{operation} is not available in the {step} step")]
    InvalidStep {
        operation: &'static str,
        step: &'static str,
    },

    #[error("Another sign-in operation is already running")]
    OperationInProgress,

    /// The screen was reset or stepped back while the operation waited on
    /// the provider.
    #[error("The sign-in screen changed while the operation was running")]
    Superseded,

    #[error("Session store already started")]
    AlreadyStarted,

    #[error("Not authenticated")]
    NotAuthenticated,
}

fn account_conflict_message(provider: &Option<FederatedProvider>) -> String {
    match provider {
        Some(provider) => format!(
            "This email is already registered with {name}. Please use 'Continue with {name}' to sign in.",
            name = provider.display_name()
        ),
        None => {
            "An account already exists with this email using a different sign-in method."
                .to_string()
        }
    }
}

impl AuthError {
    /// Map an identity-provider error code onto the taxonomy.
    pub fn from_provider(error: &IdentityError) -> Self {
        match error.code.as_str() {
            "auth/popup-closed-by-user" | "auth/cancelled-popup-request" => AuthError::Cancelled,
            "auth/account-exists-with-different-credential" | "auth/email-already-in-use" => {
                AuthError::AccountConflict { provider: None }
            }
            "auth/wrong-password" | "auth/invalid-credential" | "auth/invalid-login-credentials" => {
                AuthError::WrongPassword
            }
            "auth/weak-password" => AuthError::WeakPassword,
            "auth/too-many-requests" => AuthError::RateLimited,
            "auth/popup-blocked" => AuthError::PopupBlocked,
            "auth/invalid-email" | "auth/missing-email" => AuthError::InvalidEmail,
            "auth/network-request-failed" => AuthError::NetworkFailure,
            _ => AuthError::Other(error.message.clone()),
        }
    }

    /// Whether the user backed out on their own; shown as information rather
    /// than as an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AuthError::Cancelled)
    }
}

impl From<IdentityError> for AuthError {
    fn from(error: IdentityError) -> Self {
        AuthError::from_provider(&error)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn map(code: &str) -> AuthError {
        AuthError::from_provider(&IdentityError::new(code, "provider says no"))
    }

    #[test]
    fn test_provider_code_mapping() {
        assert_eq!(map("auth/popup-closed-by-user"), AuthError::Cancelled);
        assert_eq!(
            map("auth/account-exists-with-different-credential"),
            AuthError::AccountConflict { provider: None }
        );
        assert_eq!(map("auth/wrong-password"), AuthError::WrongPassword);
        assert_eq!(map("auth/invalid-credential"), AuthError::WrongPassword);
        assert_eq!(map("auth/weak-password"), AuthError::WeakPassword);
        assert_eq!(map("auth/too-many-requests"), AuthError::RateLimited);
        assert_eq!(map("auth/popup-blocked"), AuthError::PopupBlocked);
        assert_eq!(map("auth/invalid-email"), AuthError::InvalidEmail);
        assert_eq!(map("auth/network-request-failed"), AuthError::NetworkFailure);
        assert_eq!(
            map("auth/internal-error"),
            AuthError::Other("provider says no".to_string())
        );
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(AuthError::Cancelled.to_string(), "Login cancelled.");
        assert_eq!(
            AuthError::WeakPassword.to_string(),
            "Password should be at least 6 characters."
        );
        assert_eq!(
            AuthError::Other("boom".to_string()).to_string(),
            "Error: boom"
        );
        assert_eq!(
            AuthError::AccountConflict { provider: None }.to_string(),
            "An account already exists with this email using a different sign-in method."
        );
        assert_eq!(
            AuthError::AccountConflict {
                provider: Some(FederatedProvider::GitHub)
            }
            .to_string(),
            "This email is already registered with GitHub. Please use 'Continue with GitHub' to sign in."
        );
    }

    #[test]
    fn test_cancellation_flag() {
        assert!(AuthError::Cancelled.is_cancellation());
        assert!(!AuthError::WrongPassword.is_cancellation());
    }
}
