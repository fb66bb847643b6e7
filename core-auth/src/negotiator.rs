//! # Credential Negotiator
//!
//! Multi-step state machine that works out whether an email address should
//! sign in, register, or be sent back to the federated provider it already
//! belongs to, so one address never ends up with two accounts.
//!
//! ```text
//!   Choose ──choose_email──> EmailEntry ──submit_email──> PasswordEntry
//!     ^                          │  ^                          │
//!     └──── federated-only ──────┘  └──── registration done ───┘
//! ```
//!
//! Federated sign-in is a direct pass-through to the provider popup. The
//! resulting session reaches the [`SessionStore`](crate::SessionStore)
//! through the provider's own change notification.

use bridge_traits::identity::{FederatedProvider, IdentityProvider, PASSWORD_METHOD};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::types::{
    EmailRoute, Identity, NegotiationSnapshot, NegotiationStep, Notice, PasswordOutcome,
};

/// Minimum password length enforced before a registration is attempted.
pub const MIN_PASSWORD_LEN: usize = 6;

const MSG_LOGGED_IN: &str = "Logged in successfully!";
const MSG_WELCOME_BACK: &str = "Welcome back! Please enter your password to sign in.";
const MSG_NO_ACCOUNT: &str = "No account found. Create a new account by setting a password.";
const MSG_ACCOUNT_CREATED: &str =
    "Account created! Please check your email to verify before logging in.";

/// Decide where an email goes based on the sign-in methods bound to it.
///
/// Priority: a federated method without a password wins (Google before
/// GitHub), then an existing password, then registration.
///
/// ```
/// use core_auth::negotiator::route_for_methods;
/// use core_auth::EmailRoute;
/// use bridge_traits::FederatedProvider;
///
/// let methods = vec!["github.com".to_string(), "google.com".to_string()];
/// assert_eq!(
///     route_for_methods(&methods),
///     EmailRoute::UseFederated(FederatedProvider::Google)
/// );
/// ```
pub fn route_for_methods(methods: &[String]) -> EmailRoute {
    let has = |id: &str| methods.iter().any(|m| m == id);
    let has_password = has(PASSWORD_METHOD);

    if !has_password {
        if let Some(provider) = FederatedProvider::ALL
            .into_iter()
            .find(|p| has(p.method_id()))
        {
            return EmailRoute::UseFederated(provider);
        }
    }

    if has_password {
        EmailRoute::SignIn
    } else {
        EmailRoute::Register
    }
}

fn federated_hint_message(provider: FederatedProvider) -> String {
    format!(
        "This email is registered with {name}. Please use \"Continue with {name}\" to sign in.",
        name = provider.display_name()
    )
}

#[derive(Debug, Default)]
struct NegotiationState {
    step: NegotiationStep,
    notice: Option<Notice>,
    // Bumped by `reset` and `back`; results of operations started under an
    // older generation are not applied.
    generation: u64,
}

impl NegotiationState {
    fn restart(&mut self, notice: Option<Notice>) {
        self.step = NegotiationStep::initial();
        self.notice = notice;
    }
}

/// Drives the sign-in screen.
///
/// Operations invoked from the wrong step fail with
/// [`AuthError::InvalidStep`] and leave the state untouched. Only one
/// provider-facing operation runs at a time; an overlapping call fails with
/// [`AuthError::OperationInProgress`].
///
/// [`reset`](Self::reset) and [`back`](Self::back) win over an operation
/// still waiting on the provider: its step and notice are discarded when it
/// completes. `submit_email` then fails with [`AuthError::Superseded`]; the
/// other operations still report what the provider did.
pub struct CredentialNegotiator {
    provider: Arc<dyn IdentityProvider>,
    state: RwLock<NegotiationState>,
    in_flight: Mutex<()>,
}

impl CredentialNegotiator {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            state: RwLock::new(NegotiationState::default()),
            in_flight: Mutex::new(()),
        }
    }

    pub async fn step(&self) -> NegotiationStep {
        self.state.read().await.step.clone()
    }

    pub async fn notice(&self) -> Option<Notice> {
        self.state.read().await.notice.clone()
    }

    pub async fn snapshot(&self) -> NegotiationSnapshot {
        let state = self.state.read().await;
        NegotiationSnapshot {
            step: state.step.clone(),
            notice: state.notice.clone(),
        }
    }

    /// Back to `Choose`, clearing drafts and messages.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.restart(None);
        state.generation += 1;
        debug!("Negotiation reset");
    }

    /// `Choose` → `EmailEntry` with an empty draft.
    pub async fn choose_email(&self) -> Result<()> {
        let mut state = self.state.write().await;
        expect_choose(&state.step, "choose_email")?;
        state.step = NegotiationStep::EmailEntry {
            draft: String::new(),
        };
        state.notice = None;
        Ok(())
    }

    /// Keep the typed email in the `EmailEntry` draft.
    pub async fn update_draft(&self, draft: impl Into<String>) -> Result<()> {
        let mut state = self.state.write().await;
        match &mut state.step {
            NegotiationStep::EmailEntry { draft: current } => {
                *current = draft.into();
                Ok(())
            }
            other => Err(invalid_step("update_draft", other)),
        }
    }

    /// Popup-based federated sign-in from `Choose`.
    #[instrument(skip(self, provider), fields(provider = %provider))]
    pub async fn sign_in_federated(&self, provider: FederatedProvider) -> Result<Identity> {
        let _guard = self.begin()?;
        let generation = {
            let state = self.state.read().await;
            expect_choose(&state.step, "sign_in_federated")?;
            state.generation
        };

        info!("Starting federated sign-in");
        match self.provider.sign_in_with_popup(provider).await {
            Ok(user) => {
                let identity = Identity::from(user);
                info!(uid = %identity.uid, "Federated sign-in succeeded");
                self.commit(generation, |state| {
                    state.restart(Some(Notice::success(MSG_LOGGED_IN)))
                })
                .await;
                Ok(identity)
            }
            Err(e) => {
                let error = AuthError::from_provider(&e);
                if error.is_cancellation() {
                    debug!("Federated sign-in cancelled");
                } else {
                    warn!(code = %e.code, "Federated sign-in failed");
                }
                Err(self.fail_in_place(generation, error).await)
            }
        }
    }

    /// Look up the methods bound to `email` and route accordingly.
    ///
    /// Returns the new step.
    #[instrument(skip(self, email))]
    pub async fn submit_email(&self, email: &str) -> Result<NegotiationStep> {
        let _guard = self.begin()?;
        let generation = {
            let state = self.state.read().await;
            if !matches!(state.step, NegotiationStep::EmailEntry { .. }) {
                return Err(invalid_step("submit_email", &state.step));
            }
            state.generation
        };

        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(self.fail_in_place(generation, AuthError::InvalidEmail).await);
        }

        let methods = match self.provider.fetch_sign_in_methods(&email).await {
            Ok(methods) => methods,
            Err(e) => {
                warn!(code = %e.code, "Sign-in method lookup failed");
                let applied = self
                    .commit(generation, |state| {
                        state.step = NegotiationStep::EmailEntry { draft: email };
                        state.notice = Some(Notice::from_error(AuthError::InvalidEmail));
                    })
                    .await;
                return Err(if applied {
                    AuthError::InvalidEmail
                } else {
                    AuthError::Superseded
                });
            }
        };

        let route = route_for_methods(&methods);
        debug!(?route, method_count = methods.len(), "Email routed");

        let (step, notice) = match route {
            EmailRoute::UseFederated(provider) => (
                NegotiationStep::Choose {
                    hint: Some(provider),
                },
                Notice::info(federated_hint_message(provider)),
            ),
            EmailRoute::SignIn => (
                NegotiationStep::PasswordEntry {
                    email,
                    is_existing_account: true,
                },
                Notice::info(MSG_WELCOME_BACK),
            ),
            EmailRoute::Register => (
                NegotiationStep::PasswordEntry {
                    email,
                    is_existing_account: false,
                },
                Notice::info(MSG_NO_ACCOUNT),
            ),
        };

        let applied = self
            .commit(generation, |state| {
                state.step = step.clone();
                state.notice = Some(notice);
            })
            .await;
        if applied {
            Ok(step)
        } else {
            Err(AuthError::Superseded)
        }
    }

    /// Sign in or register with `password`, depending on the current
    /// `PasswordEntry`.
    #[instrument(skip(self, password))]
    pub async fn submit_password(&self, password: &str) -> Result<PasswordOutcome> {
        let _guard = self.begin()?;
        let (email, is_existing_account, generation) = {
            let state = self.state.read().await;
            match &state.step {
                NegotiationStep::PasswordEntry {
                    email,
                    is_existing_account,
                } => (email.clone(), *is_existing_account, state.generation),
                other => return Err(invalid_step("submit_password", other)),
            }
        };

        if is_existing_account {
            self.sign_in_existing(generation, &email, password).await
        } else {
            self.register(generation, &email, password).await
        }
    }

    /// `PasswordEntry` → `EmailEntry` (draft kept); `EmailEntry` → reset.
    pub async fn back(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let next = match &state.step {
            NegotiationStep::PasswordEntry { email, .. } => NegotiationStep::EmailEntry {
                draft: email.clone(),
            },
            NegotiationStep::EmailEntry { .. } => NegotiationStep::initial(),
            other => return Err(invalid_step("back", other)),
        };
        state.step = next;
        state.notice = None;
        state.generation += 1;
        Ok(())
    }

    async fn sign_in_existing(
        &self,
        generation: u64,
        email: &str,
        password: &str,
    ) -> Result<PasswordOutcome> {
        let user = match self.provider.sign_in_with_password(email, password).await {
            Ok(user) => user,
            Err(e) => {
                warn!(code = %e.code, "Password sign-in failed");
                return Err(self.fail(generation, AuthError::from_provider(&e)).await);
            }
        };

        if !user.email_verified {
            info!(uid = %user.uid, "Email not verified; signing back out");
            if let Err(e) = self.provider.sign_out().await {
                warn!(code = %e.code, "Sign-out after unverified sign-in failed");
            }
            return Err(self.fail_in_place(generation, AuthError::Unverified).await);
        }

        let identity = Identity::from(user);
        info!(uid = %identity.uid, "Password sign-in succeeded");
        self.commit(generation, |state| {
            state.restart(Some(Notice::success(MSG_LOGGED_IN)))
        })
        .await;
        Ok(PasswordOutcome::Authenticated(identity))
    }

    async fn register(
        &self,
        generation: u64,
        email: &str,
        password: &str,
    ) -> Result<PasswordOutcome> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(self.fail_in_place(generation, AuthError::WeakPassword).await);
        }

        // The email may have been claimed since it was looked up.
        let methods = match self.provider.fetch_sign_in_methods(email).await {
            Ok(methods) => methods,
            Err(e) => {
                warn!(code = %e.code, "Sign-in method re-check failed");
                return Err(self
                    .fail_in_place(generation, AuthError::from_provider(&e))
                    .await);
            }
        };
        if !methods.is_empty() {
            let provider = match route_for_methods(&methods) {
                EmailRoute::UseFederated(provider) => Some(provider),
                _ => None,
            };
            info!("Email claimed during registration; aborting");
            return Err(self.conflict(generation, provider).await);
        }

        let user = match self.provider.create_user(email, password).await {
            Ok(user) => user,
            Err(e) if e.code == "auth/email-already-in-use" => {
                info!("Provider reports email already in use");
                return Err(self.conflict(generation, None).await);
            }
            Err(e) => {
                warn!(code = %e.code, "Account creation failed");
                return Err(self
                    .fail_in_place(generation, AuthError::from_provider(&e))
                    .await);
            }
        };

        info!(uid = %user.uid, "Account created; sending verification email");
        if let Err(e) = self.provider.send_email_verification(&user).await {
            warn!(code = %e.code, "Verification email dispatch failed");
        }
        if let Err(e) = self.provider.sign_out().await {
            warn!(code = %e.code, "Sign-out after registration failed");
        }

        self.commit(generation, |state| {
            state.step = NegotiationStep::EmailEntry {
                draft: String::new(),
            };
            state.notice = Some(Notice::success(MSG_ACCOUNT_CREATED));
        })
        .await;
        Ok(PasswordOutcome::VerificationSent {
            email: email.to_string(),
        })
    }

    /// Apply `update` unless the screen was reset or stepped back since
    /// `generation`. Returns whether it was applied.
    async fn commit(&self, generation: u64, update: impl FnOnce(&mut NegotiationState)) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Screen changed during the operation; discarding its result");
            return false;
        }
        update(&mut state);
        true
    }

    /// Record `error` as a notice without changing the step.
    async fn fail_in_place(&self, generation: u64, error: AuthError) -> AuthError {
        let notice = Notice::from_error(error.clone());
        self.commit(generation, |state| state.notice = Some(notice))
            .await;
        error
    }

    /// Record `error`, re-routing to `Choose` when it is an account conflict.
    async fn fail(&self, generation: u64, error: AuthError) -> AuthError {
        match error {
            AuthError::AccountConflict { provider } => self.conflict(generation, provider).await,
            other => self.fail_in_place(generation, other).await,
        }
    }

    async fn conflict(&self, generation: u64, provider: Option<FederatedProvider>) -> AuthError {
        let error = AuthError::AccountConflict { provider };
        let notice = Notice::from_error(error.clone());
        self.commit(generation, |state| {
            state.step = NegotiationStep::Choose { hint: provider };
            state.notice = Some(notice);
        })
        .await;
        error
    }

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.in_flight
            .try_lock()
            .map_err(|_| AuthError::OperationInProgress)
    }
}

fn expect_choose(step: &NegotiationStep, operation: &'static str) -> Result<()> {
    match step {
        NegotiationStep::Choose { .. } => Ok(()),
        other => Err(invalid_step(operation, other)),
    }
}

fn invalid_step(operation: &'static str, step: &NegotiationStep) -> AuthError {
    AuthError::InvalidStep {
        operation,
        step: step.name(),
    }
}
