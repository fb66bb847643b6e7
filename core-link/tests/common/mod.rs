//! Host fakes shared by the linking integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::MemorySettingsStore;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::{
    MessageListener, OpenerHandle, PopupFeatures, PopupHandle, TokenSource, WindowHost,
    WindowMessage,
};
use core_link::{BackendClient, CloudProvider, LinkEnvironment};
use core_runtime::config::LinkSettings;
use mockall::mock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const APP_ORIGIN: &str = "https://app.test";
pub const API_BASE: &str = "http://api.test/api";
pub const RETURN_URL: &str = "https://app.test/projects";

mock! {
    pub HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
    }
}

/// Canned backend answers keyed by URL substring, with a log of every
/// request made.
#[derive(Clone, Default)]
pub struct Routes {
    routes: Arc<Mutex<Vec<(String, u16, String)>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL contains `fragment`. Later routes win.
    pub fn on(&self, fragment: &str, status: u16, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .push((fragment.to_string(), status, body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.urls().iter().filter(|u| u.contains(fragment)).count()
    }

    pub fn http_client(&self) -> MockHttpClient {
        let routes = self.clone();
        let mut mock = MockHttpClient::new();
        mock.expect_execute().returning(move |request| {
            routes.requests.lock().unwrap().push(request.clone());
            let answer = routes
                .routes
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(fragment, _, _)| request.url.contains(fragment.as_str()))
                .map(|(_, status, body)| HttpResponse::new(*status, body.clone()));
            answer.ok_or_else(|| BridgeError::OperationFailed(format!("no route for {}", request.url)))
        });
        mock
    }
}

pub struct StaticToken;

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok("id-token".to_string())
    }
}

pub fn backend(routes: &Routes, provider: CloudProvider) -> BackendClient {
    BackendClient::new(
        Arc::new(routes.http_client()),
        Arc::new(StaticToken),
        API_BASE,
        provider,
    )
}

// ============================================================================
// Window host
// ============================================================================

pub struct FakePopup {
    pub url: String,
    pub name: String,
    pub features: PopupFeatures,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl FakePopup {
    /// The user closes the window.
    pub fn user_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

struct PopupRef(Arc<FakePopup>);

impl PopupHandle for PopupRef {
    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    fn close(&self) {
        self.0.close_calls.fetch_add(1, Ordering::SeqCst);
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

struct ChannelListener(mpsc::UnboundedReceiver<WindowMessage>);

#[async_trait]
impl MessageListener for ChannelListener {
    async fn recv(&mut self) -> Option<WindowMessage> {
        self.0.recv().await
    }
}

#[derive(Default)]
pub struct FakeOpener {
    posted: Mutex<Vec<(serde_json::Value, String)>>,
    fail: AtomicBool,
}

impl FakeOpener {
    pub fn posted(&self) -> Vec<(serde_json::Value, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn fail_posts(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

struct OpenerRef(Arc<FakeOpener>);

impl OpenerHandle for OpenerRef {
    fn post_message(&self, data: serde_json::Value, target_origin: &str) -> Result<()> {
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("opener gone".to_string()));
        }
        self.0
            .posted
            .lock()
            .unwrap()
            .push((data, target_origin.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct WindowState {
    current_url: String,
    block_popups: bool,
    confirm_answer: bool,
    popups: Vec<Arc<FakePopup>>,
    listeners: Vec<mpsc::UnboundedSender<WindowMessage>>,
    opener: Option<Arc<FakeOpener>>,
    confirms: Vec<String>,
    redirects: Vec<String>,
    closed: bool,
}

/// Scriptable browser window.
#[derive(Clone, Default)]
pub struct FakeWindowHost {
    state: Arc<Mutex<WindowState>>,
}

impl FakeWindowHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_popups(&self) {
        self.state.lock().unwrap().block_popups = true;
    }

    pub fn answer_confirm(&self, answer: bool) {
        self.state.lock().unwrap().confirm_answer = answer;
    }

    pub fn set_current_url(&self, url: &str) {
        self.state.lock().unwrap().current_url = url.to_string();
    }

    pub fn install_opener(&self) -> Arc<FakeOpener> {
        let opener = Arc::new(FakeOpener::default());
        self.state.lock().unwrap().opener = Some(Arc::clone(&opener));
        opener
    }

    pub fn popups(&self) -> Vec<Arc<FakePopup>> {
        self.state.lock().unwrap().popups.clone()
    }

    pub fn last_popup(&self) -> Arc<FakePopup> {
        self.popups().pop().expect("no popup opened")
    }

    /// Deliver a message to every live listener of this window.
    pub fn deliver(&self, origin: &str, data: serde_json::Value) {
        let message = WindowMessage::new(origin, data);
        self.state
            .lock()
            .unwrap()
            .listeners
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    /// Listeners whose receiving side is still alive.
    pub fn live_listeners(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.listeners.retain(|tx| !tx.is_closed());
        state.listeners.len()
    }

    pub fn confirms(&self) -> Vec<String> {
        self.state.lock().unwrap().confirms.clone()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.state.lock().unwrap().redirects.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl WindowHost for FakeWindowHost {
    fn origin(&self) -> String {
        APP_ORIGIN.to_string()
    }

    fn current_url(&self) -> String {
        self.state.lock().unwrap().current_url.clone()
    }

    fn open_popup(
        &self,
        url: &str,
        name: &str,
        features: &PopupFeatures,
    ) -> Option<Box<dyn PopupHandle>> {
        let mut state = self.state.lock().unwrap();
        if state.block_popups {
            return None;
        }
        let popup = Arc::new(FakePopup {
            url: url.to_string(),
            name: name.to_string(),
            features: *features,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        state.popups.push(Arc::clone(&popup));
        Some(Box::new(PopupRef(popup)))
    }

    fn add_message_listener(&self) -> Box<dyn MessageListener> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().listeners.push(tx);
        Box::new(ChannelListener(rx))
    }

    fn opener(&self) -> Option<Box<dyn OpenerHandle>> {
        self.state
            .lock()
            .unwrap()
            .opener
            .clone()
            .map(|o| Box::new(OpenerRef(o)) as Box<dyn OpenerHandle>)
    }

    async fn confirm(&self, prompt: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.confirms.push(prompt.to_string());
        state.confirm_answer
    }

    fn redirect(&self, url: &str) -> Result<()> {
        self.state.lock().unwrap().redirects.push(url.to_string());
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

pub fn environment(host: &FakeWindowHost, settings: &MemorySettingsStore) -> LinkEnvironment {
    LinkEnvironment {
        window_host: Arc::new(host.clone()),
        settings_store: Arc::new(settings.clone()),
        settings: LinkSettings::default(),
        app_origin: APP_ORIGIN.to_string(),
        return_url: RETURN_URL.to_string(),
    }
}
