//! # Authentication Module
//!
//! Identity negotiation on top of an opaque identity-provider SDK.
//!
//! ## Overview
//!
//! - [`SessionStore`] holds the current identity, fed exclusively by the
//!   provider's session-change notifications, and hands out fresh bearer
//!   tokens for backend calls.
//! - [`CredentialNegotiator`] decides between "sign in", "sign up" and "you
//!   already use a different method" for email/password flows, and passes
//!   federated sign-in straight through to the provider popup.
//!
//! ## Features
//!
//! - Unverified password accounts are never published as authenticated
//! - Provider error codes mapped to user-readable [`AuthError`]s
//! - Session events emitted on the shared event bus

pub mod error;
pub mod negotiator;
pub mod session;
pub mod types;

pub use error::{AuthError, Result};
pub use negotiator::{CredentialNegotiator, MIN_PASSWORD_LEN};
pub use session::SessionStore;
pub use types::{
    EmailRoute, Identity, NegotiationSnapshot, NegotiationStep, Notice, NoticeKind,
    PasswordOutcome, Session, SignInMethod,
};
