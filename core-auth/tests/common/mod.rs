//! In-memory identity provider used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::identity::{
    FederatedProvider, IdentityError, IdentityProvider, IdentityResult, SessionChange,
    SessionChangeStream, UserRecord,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

#[derive(Clone, Debug)]
pub struct Account {
    pub uid: String,
    pub methods: Vec<String>,
    pub password: Option<String>,
    pub verified: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    claims_after_lookup: HashMap<String, Vec<String>>,
    popup_results: HashMap<FederatedProvider, IdentityResult<UserRecord>>,
    lookup_error: Option<IdentityError>,
    lookup_gate: Option<Arc<Notify>>,
    create_error: Option<IdentityError>,
    verification_error: Option<IdentityError>,
    reload_error: Option<IdentityError>,
    current_user: Option<UserRecord>,
    subscribers: Vec<mpsc::UnboundedSender<SessionChange>>,
    lookups: Vec<String>,
    created: Vec<String>,
    verifications_sent: Vec<String>,
    sign_outs: usize,
    reloads: usize,
    token_requests: Vec<bool>,
}

/// Fake identity-provider SDK.
///
/// Sign-in, registration and sign-out push the corresponding notification to
/// every session-change subscriber, like the real SDK does.
#[derive(Clone, Default)]
pub struct FakeIdentityProvider {
    state: Arc<Mutex<State>>,
}

fn user_record(email: &str, account: &Account, method: &str) -> UserRecord {
    UserRecord {
        uid: account.uid.clone(),
        email: Some(email.to_string()),
        email_verified: account.verified,
        display_name: None,
        sign_in_method: method.to_string(),
    }
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, email: &str, methods: &[&str], password: Option<&str>, verified: bool) -> Self {
        let uid = format!("uid-{}", email);
        self.state.lock().unwrap().accounts.insert(
            email.to_string(),
            Account {
                uid,
                methods: methods.iter().map(|m| m.to_string()).collect(),
                password: password.map(str::to_string),
                verified,
            },
        );
        self
    }

    /// After the first lookup of `email`, bind `methods` to it.
    pub fn claim_after_lookup(&self, email: &str, methods: &[&str]) {
        self.state.lock().unwrap().claims_after_lookup.insert(
            email.to_string(),
            methods.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn set_popup_result(&self, provider: FederatedProvider, result: IdentityResult<UserRecord>) {
        self.state.lock().unwrap().popup_results.insert(provider, result);
    }

    /// Hold every later lookup until the returned gate is notified, once per
    /// lookup. The lookup is recorded before it waits.
    pub fn gate_lookups(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().lookup_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_lookups(&self, error: IdentityError) {
        self.state.lock().unwrap().lookup_error = Some(error);
    }

    pub fn fail_create(&self, error: IdentityError) {
        self.state.lock().unwrap().create_error = Some(error);
    }

    pub fn fail_verification(&self, error: IdentityError) {
        self.state.lock().unwrap().verification_error = Some(error);
    }

    pub fn fail_reloads(&self, error: IdentityError) {
        self.state.lock().unwrap().reload_error = Some(error);
    }

    pub fn verify(&self, email: &str) {
        if let Some(account) = self.state.lock().unwrap().accounts.get_mut(email) {
            account.verified = true;
        }
    }

    /// Push a notification to every subscriber, as if the SDK emitted it.
    pub fn notify(&self, change: SessionChange) {
        let mut state = self.state.lock().unwrap();
        state.current_user = match &change {
            SessionChange::SignedIn(user) => Some(user.clone()),
            SessionChange::SignedOut => None,
        };
        state.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn account(&self, email: &str) -> Option<Account> {
        self.state.lock().unwrap().accounts.get(email).cloned()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.state.lock().unwrap().lookups.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn verifications_sent(&self) -> Vec<String> {
        self.state.lock().unwrap().verifications_sent.clone()
    }

    pub fn sign_outs(&self) -> usize {
        self.state.lock().unwrap().sign_outs
    }

    pub fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    pub fn token_requests(&self) -> Vec<bool> {
        self.state.lock().unwrap().token_requests.clone()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.state.lock().unwrap().current_user.clone()
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<SessionChange>);

#[async_trait]
impl SessionChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<SessionChange> {
        self.0.recv().await
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn subscribe_session_changes(&self) -> Box<dyn SessionChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let initial = match &state.current_user {
            Some(user) => SessionChange::SignedIn(user.clone()),
            None => SessionChange::SignedOut,
        };
        let _ = tx.send(initial);
        state.subscribers.push(tx);
        Box::new(ChannelStream(rx))
    }

    async fn reload_user(&self, user: &UserRecord) -> IdentityResult<UserRecord> {
        let mut state = self.state.lock().unwrap();
        state.reloads += 1;
        if let Some(error) = &state.reload_error {
            return Err(error.clone());
        }
        let email = user.email.clone().unwrap_or_default();
        match state.accounts.get(&email) {
            Some(account) => Ok(UserRecord {
                email_verified: account.verified,
                ..user.clone()
            }),
            None => Ok(user.clone()),
        }
    }

    async fn id_token(&self, force_refresh: bool) -> IdentityResult<String> {
        let mut state = self.state.lock().unwrap();
        state.token_requests.push(force_refresh);
        match &state.current_user {
            Some(user) => Ok(format!("token-{}", user.uid)),
            None => Err(IdentityError::new("auth/no-current-user", "No user")),
        }
    }

    async fn sign_in_with_popup(&self, provider: FederatedProvider) -> IdentityResult<UserRecord> {
        let result = self
            .state
            .lock()
            .unwrap()
            .popup_results
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| {
                Err(IdentityError::new(
                    "auth/popup-closed-by-user",
                    "The popup has been closed by the user",
                ))
            });
        if let Ok(user) = &result {
            self.notify(SessionChange::SignedIn(user.clone()));
        }
        result
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<UserRecord> {
        let user = {
            let state = self.state.lock().unwrap();
            let account = state
                .accounts
                .get(email)
                .filter(|a| a.password.is_some())
                .ok_or_else(|| IdentityError::new("auth/user-not-found", "No such user"))?;
            if account.password.as_deref() != Some(password) {
                return Err(IdentityError::new("auth/wrong-password", "Wrong password"));
            }
            user_record(email, account, "password")
        };
        self.notify(SessionChange::SignedIn(user.clone()));
        Ok(user)
    }

    async fn create_user(&self, email: &str, password: &str) -> IdentityResult<UserRecord> {
        let user = {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.create_error.clone() {
                return Err(error);
            }
            if state.accounts.contains_key(email) {
                return Err(IdentityError::new(
                    "auth/email-already-in-use",
                    "Email already in use",
                ));
            }
            let account = Account {
                uid: format!("uid-{}", email),
                methods: vec!["password".to_string()],
                password: Some(password.to_string()),
                verified: false,
            };
            let user = user_record(email, &account, "password");
            state.accounts.insert(email.to_string(), account);
            state.created.push(email.to_string());
            user
        };
        self.notify(SessionChange::SignedIn(user.clone()));
        Ok(user)
    }

    async fn send_email_verification(&self, user: &UserRecord) -> IdentityResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = &state.verification_error {
            return Err(error.clone());
        }
        state
            .verifications_sent
            .push(user.email.clone().unwrap_or_default());
        Ok(())
    }

    async fn sign_out(&self) -> IdentityResult<()> {
        self.state.lock().unwrap().sign_outs += 1;
        self.notify(SessionChange::SignedOut);
        Ok(())
    }

    async fn fetch_sign_in_methods(&self, email: &str) -> IdentityResult<Vec<String>> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.lookups.push(email.to_string());
            state.lookup_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = &state.lookup_error {
            return Err(error.clone());
        }
        let methods = state
            .accounts
            .get(email)
            .map(|a| a.methods.clone())
            .unwrap_or_default();

        if let Some(claimed) = state.claims_after_lookup.remove(email) {
            state.accounts.insert(
                email.to_string(),
                Account {
                    uid: format!("uid-{}", email),
                    methods: claimed,
                    password: None,
                    verified: true,
                },
            );
        }
        Ok(methods)
    }
}

pub fn federated_user(uid: &str, email: &str, provider: FederatedProvider) -> UserRecord {
    UserRecord {
        uid: uid.to_string(),
        email: Some(email.to_string()),
        email_verified: true,
        display_name: Some("Federated User".to_string()),
        sign_in_method: provider.method_id().to_string(),
    }
}
