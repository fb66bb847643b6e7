//! Integration tests for the ExternalStorageLinker
//!
//! Time is paused in these tests, so poll ticks and the settle delay run on
//! virtual time.

mod common;

use bridge_desktop::MemorySettingsStore;
use bridge_traits::{PopupFeatures, SettingsStore};
use common::{backend, environment, FakeWindowHost, Routes, APP_ORIGIN};
use core_link::{
    CloudProvider, ConnectionRecord, ConnectionStatusStore, ExternalStorageLinker,
    LinkCallbackHandler, LinkError, LinkMessage, LinkStatus, ReturnFlags,
};
use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const AUTH_URL: &str = "https://login.test/consent?client=abc";

struct Harness {
    routes: Routes,
    host: FakeWindowHost,
    settings: MemorySettingsStore,
    status: ConnectionStatusStore,
    events: broadcast::Receiver<CoreEvent>,
    linker: ExternalStorageLinker,
}

fn harness(provider: CloudProvider) -> Harness {
    let routes = Routes::new();
    routes
        .on("/auth-url/", 200, &format!(r#"{{"authUrl":"{}"}}"#, AUTH_URL))
        .on("/status/", 200, r#"{"connected":false}"#)
        .on("/disconnect", 200, "{}");

    let host = FakeWindowHost::new();
    let settings = MemorySettingsStore::new();
    let event_bus = EventBus::default();
    let events = event_bus.subscribe();
    let api = backend(&routes, provider);
    let status = ConnectionStatusStore::new(api.clone(), event_bus.clone());
    let linker = ExternalStorageLinker::new(
        api,
        status.clone(),
        environment(&host, &settings),
        event_bus,
    );

    Harness {
        routes,
        host,
        settings,
        status,
        events,
        linker,
    }
}

fn drain(events: &mut broadcast::Receiver<CoreEvent>) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Link(event) = event {
            seen.push(event);
        }
    }
    seen
}

async fn wait_for_status(linker: &ExternalStorageLinker, project_id: &str, status: LinkStatus) {
    let mut updates = linker.subscribe(project_id).await.expect("no attempt");
    timeout(Duration::from_secs(30), updates.wait_for(|s| s.status == status))
        .await
        .expect("status not reached")
        .expect("attempt dropped");
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_consent_window() {
    let mut h = harness(CloudProvider::OneDrive);

    let snapshot = h.linker.connect("p1").await.unwrap();

    assert_eq!(snapshot.status, LinkStatus::AwaitingCallback);
    assert_eq!(snapshot.project_id, "p1");
    assert!(!snapshot.popup_closed);

    let popup = h.host.last_popup();
    assert_eq!(popup.url, AUTH_URL);
    assert_eq!(popup.name, "onedrive-link");
    assert_eq!(popup.features, PopupFeatures::sized(800, 900));

    let auth_request = &h.routes.requests()[0];
    assert_eq!(auth_request.url, "http://api.test/api/onedrive/auth-url/p1");
    assert!(!auth_request.is_authenticated());

    assert_eq!(
        h.settings
            .get_string("pending_link_project:onedrive")
            .await
            .unwrap(),
        Some(r#"["p1"]"#.to_string())
    );
    assert_eq!(
        drain(&mut h.events),
        vec![LinkEvent::AttemptStarted {
            project_id: "p1".to_string(),
            provider: "onedrive".to_string(),
            attempt_id: snapshot.attempt_id,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connected_message_refreshes_status_after_settle_delay() {
    let mut h = harness(CloudProvider::GoogleDrive);
    let snapshot = h.linker.connect("p1").await.unwrap();
    h.routes.on(
        "/status/",
        200,
        r#"{"connected":true,"email":"b@y.com","folderId":"d1","folderName":"Images"}"#,
    );

    h.host
        .deliver(APP_ORIGIN, json!({"type": "CONNECTED", "email": "b@y.com"}));
    wait_for_status(&h.linker, "p1", LinkStatus::Succeeded).await;

    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.account_email.as_deref(), Some("b@y.com"));
    assert_eq!(h.host.last_popup().close_calls(), 1);
    assert_eq!(h.routes.count("/status/"), 0);

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.routes.count("/status/"), 0);
    assert_eq!(h.status.get("p1").await, None);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.routes.count("/status/"), 1);
    assert_eq!(
        h.status.get("p1").await,
        Some(ConnectionRecord {
            project_id: "p1".to_string(),
            connected: true,
            account_email: Some("b@y.com".to_string()),
            folder_id: Some("d1".to_string()),
            folder_name: Some("Images".to_string()),
        })
    );
    assert_eq!(h.host.live_listeners(), 0);

    let events = drain(&mut h.events);
    assert!(events.contains(&LinkEvent::Connected {
        project_id: "p1".to_string(),
        provider: "google".to_string(),
        attempt_id: snapshot.attempt_id,
        account_email: Some("b@y.com".to_string()),
    }));
    assert!(matches!(
        events.last(),
        Some(LinkEvent::StatusRefreshed {
            connected: true,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_closed_window_without_message_stays_awaiting() {
    let mut h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();

    h.host.last_popup().user_close();
    sleep(Duration::from_millis(600)).await;

    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.status, LinkStatus::AwaitingCallback);
    assert!(session.popup_closed);
    assert!(session.is_ambiguous());
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, LinkEvent::OutcomeAmbiguous { .. })));

    sleep(Duration::from_secs(600)).await;
    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.status, LinkStatus::AwaitingCallback);
    assert_eq!(session.error, None);
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_message_after_close_still_completes() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();
    h.host.last_popup().user_close();
    sleep(Duration::from_millis(600)).await;
    assert!(h.linker.session("p1").await.unwrap().popup_closed);

    h.host.deliver(APP_ORIGIN, json!({"type": "CONNECTED"}));
    wait_for_status(&h.linker, "p1", LinkStatus::Succeeded).await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.routes.count("/status/"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_while_in_flight_has_no_side_effect() {
    let h = harness(CloudProvider::OneDrive);
    let first = h.linker.connect("p1").await.unwrap();

    let second = h.linker.connect("p1").await;

    assert!(matches!(
        second,
        Err(LinkError::LinkInProgress { ref project_id }) if project_id == "p1"
    ));
    assert_eq!(h.host.popups().len(), 1);
    assert_eq!(h.routes.count("/auth-url/"), 1);
    assert_eq!(
        h.linker.session("p1").await.unwrap().attempt_id,
        first.attempt_id
    );

    h.linker.connect("p2").await.unwrap();
    assert_eq!(h.host.popups().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_origin_and_malformed_messages_are_ignored() {
    let mut h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();
    drain(&mut h.events);

    h.host.deliver(
        "https://evil.test",
        json!({"type": "CONNECTED", "email": "attacker@evil.test"}),
    );
    h.host
        .deliver("https://app.test.evil.io", json!({"type": "ERROR", "error": "x"}));
    h.host.deliver(APP_ORIGIN, json!({"type": "HELLO"}));
    h.host.deliver(APP_ORIGIN, json!("CONNECTED"));
    sleep(Duration::from_millis(100)).await;

    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.status, LinkStatus::AwaitingCallback);
    assert_eq!(session.account_email, None);
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.host.live_listeners(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_terminal_signal_wins() {
    let mut h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();

    h.host
        .deliver(APP_ORIGIN, json!({"type": "ERROR", "error": "access_denied"}));
    h.host
        .deliver(APP_ORIGIN, json!({"type": "CONNECTED", "email": "b@y.com"}));
    h.host.last_popup().user_close();
    sleep(Duration::from_secs(5)).await;

    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.status, LinkStatus::Failed);
    assert_eq!(session.error.as_deref(), Some("access_denied"));
    assert_eq!(session.account_email, None);
    assert!(!session.popup_closed);
    assert_eq!(h.routes.count("/status/"), 0);

    let events = drain(&mut h.events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Failed { .. }))
            .count(),
        1
    );
    assert!(!events.iter().any(|e| matches!(
        e,
        LinkEvent::Connected { .. } | LinkEvent::OutcomeAmbiguous { .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_blocked_popup_leaves_no_attempt() {
    let mut h = harness(CloudProvider::OneDrive);
    h.host.block_popups();

    let result = h.linker.connect("p1").await;

    assert!(matches!(result, Err(LinkError::PopupBlocked)));
    assert!(h.linker.session("p1").await.is_none());
    assert_eq!(
        h.settings
            .get_string("pending_link_project:onedrive")
            .await
            .unwrap(),
        None
    );
    assert_eq!(h.host.live_listeners(), 0);
    assert_eq!(
        drain(&mut h.events),
        vec![LinkEvent::PopupBlocked {
            project_id: "p1".to_string(),
            provider: "onedrive".to_string(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_url_failure_releases_reservation() {
    let h = harness(CloudProvider::OneDrive);
    h.routes
        .on("/auth-url/", 500, r#"{"error":"OneDrive not configured"}"#);
    // Left behind by a consent window that never reported back.
    h.settings
        .set_string("pending_link_project:onedrive", r#"["p1"]"#)
        .await
        .unwrap();

    let result = h.linker.connect("p1").await;

    assert!(matches!(
        result,
        Err(LinkError::Backend { status: 500, ref message }) if message == "OneDrive not configured"
    ));
    assert!(h.linker.session("p1").await.is_none());
    assert!(h.host.popups().is_empty());
    assert_eq!(
        h.settings
            .get_string("pending_link_project:onedrive")
            .await
            .unwrap(),
        None
    );

    h.routes
        .on("/auth-url/", 200, &format!(r#"{{"authUrl":"{}"}}"#, AUTH_URL));
    h.linker.connect("p1").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_project_rejected() {
    let h = harness(CloudProvider::OneDrive);
    assert!(matches!(
        h.linker.connect("  ").await,
        Err(LinkError::MissingProject)
    ));
    assert!(h.routes.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_window_and_listener() {
    let mut h = harness(CloudProvider::OneDrive);
    let snapshot = h.linker.connect("p1").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.host.live_listeners(), 1);
    drain(&mut h.events);

    assert!(h.linker.cancel("p1").await);
    sleep(Duration::from_millis(10)).await;

    assert!(h.linker.session("p1").await.is_none());
    assert_eq!(h.host.last_popup().close_calls(), 1);
    assert_eq!(h.host.live_listeners(), 0);
    assert_eq!(
        h.settings
            .get_string("pending_link_project:onedrive")
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        drain(&mut h.events),
        vec![LinkEvent::Cancelled {
            project_id: "p1".to_string(),
            provider: "onedrive".to_string(),
            attempt_id: snapshot.attempt_id.clone(),
        }]
    );

    assert!(!h.linker.cancel("p1").await);
    let retry = h.linker.connect("p1").await.unwrap();
    assert_ne!(retry.attempt_id, snapshot.attempt_id);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_attempt_can_be_replaced_or_forgotten() {
    let h = harness(CloudProvider::OneDrive);
    let first = h.linker.connect("p1").await.unwrap();
    assert!(!h.linker.forget("p1").await);

    h.host
        .deliver(APP_ORIGIN, json!({"type": "ERROR", "error": "access_denied"}));
    wait_for_status(&h.linker, "p1", LinkStatus::Failed).await;
    assert!(!h.linker.cancel("p1").await);

    let second = h.linker.connect("p1").await.unwrap();
    assert_ne!(second.attempt_id, first.attempt_id);
    assert_eq!(second.status, LinkStatus::AwaitingCallback);

    h.host.deliver(APP_ORIGIN, json!({"type": "CONNECTED"}));
    wait_for_status(&h.linker, "p1", LinkStatus::Succeeded).await;
    assert!(h.linker.forget("p1").await);
    assert!(h.linker.session("p1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_linker_stops_monitoring() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.host.live_listeners(), 1);

    let Harness { host, linker, .. } = h;
    drop(linker);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(host.live_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_requires_confirmation() {
    let mut h = harness(CloudProvider::OneDrive);
    h.status.apply_default_folder("p1", "d1", "Images").await;

    h.host.answer_confirm(false);
    assert!(!h.linker.disconnect("p1").await.unwrap());
    assert_eq!(h.routes.count("/disconnect"), 0);
    assert!(h.status.get("p1").await.unwrap().connected);

    h.host.answer_confirm(true);
    assert!(h.linker.disconnect("p1").await.unwrap());
    assert_eq!(h.routes.count("/disconnect"), 1);
    assert_eq!(
        h.status.get("p1").await,
        Some(ConnectionRecord::disconnected("p1"))
    );
    assert_eq!(h.host.confirms().len(), 2);
    assert!(h.host.confirms()[0].contains("OneDrive"));
    assert!(drain(&mut h.events).contains(&LinkEvent::Disconnected {
        project_id: "p1".to_string(),
        provider: "onedrive".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_failed_disconnect_keeps_record() {
    let h = harness(CloudProvider::OneDrive);
    h.routes.on("/disconnect", 403, r#"{"error":"Forbidden"}"#);
    h.status.apply_default_folder("p1", "d1", "Images").await;
    h.host.answer_confirm(true);

    assert!(h.linker.disconnect("p1").await.is_err());
    assert!(h.status.get("p1").await.unwrap().connected);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_return_settles_pending_attempt() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    h.routes
        .on("/status/", 200, r#"{"connected":true,"email":"b@y.com"}"#);

    let flags = h
        .linker
        .reconcile_return("https://app.test/projects?connected=true&provider=onedrive&projectId=p1")
        .await
        .unwrap()
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    assert!(flags.connected);
    assert_eq!(
        h.linker.session("p1").await.unwrap().status,
        LinkStatus::Succeeded
    );
    assert!(h.status.get("p1").await.unwrap().connected);
    assert_eq!(h.host.live_listeners(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.routes.count("/status/"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_return_failure_and_absent_flags() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();

    let flags = h
        .linker
        .reconcile_return(
            "https://app.test/projects?connected=false&provider=onedrive&projectId=p1&error=denied",
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!flags.connected);
    let session = h.linker.session("p1").await.unwrap();
    assert_eq!(session.status, LinkStatus::Failed);
    assert_eq!(session.error.as_deref(), Some("denied"));

    assert_eq!(
        h.linker
            .reconcile_return("https://app.test/projects")
            .await
            .unwrap(),
        None
    );
    assert!(matches!(
        h.linker
            .reconcile_return("https://app.test/projects?connected=true&provider=onedrive")
            .await,
        Err(LinkError::MissingProject)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_return_for_other_provider_is_ignored() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();

    let result = h
        .linker
        .reconcile_return("https://app.test/projects?connected=true&provider=google&projectId=p1")
        .await
        .unwrap();

    assert_eq!(result, None);
    assert_eq!(
        h.linker.session("p1").await.unwrap().status,
        LinkStatus::AwaitingCallback
    );
    assert_eq!(h.routes.count("/status/"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_return_without_provider_only_refreshes() {
    let h = harness(CloudProvider::OneDrive);
    h.linker.connect("p1").await.unwrap();

    let flags = h
        .linker
        .reconcile_return("https://app.test/projects?connected=true&projectId=p1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(flags.provider, None);
    assert_eq!(
        h.linker.session("p1").await.unwrap().status,
        LinkStatus::AwaitingCallback
    );
    assert_eq!(h.routes.count("/status/p1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_projects_in_flight_on_one_provider() {
    let h = harness(CloudProvider::OneDrive);
    h.routes
        .on("/authorize", 200, r#"{"email":"b@y.com"}"#)
        .on("/status/", 200, r#"{"connected":true,"email":"b@y.com"}"#);
    h.linker.connect("p1").await.unwrap();
    h.linker.connect("p2").await.unwrap();

    let callback_window = FakeWindowHost::new();
    let callback = LinkCallbackHandler::new(
        backend(&h.routes, CloudProvider::OneDrive),
        environment(&callback_window, &h.settings),
    );

    // Without state the callback cannot tell the two apart.
    let report = callback
        .handle_url("https://app.test/onedrive/callback?code=code-for-p1")
        .await
        .unwrap();
    assert_eq!(report.project_id, None);
    assert_eq!(
        report.message,
        LinkMessage::Error {
            error: "Invalid callback".to_string()
        }
    );
    assert_eq!(h.routes.count("/authorize"), 0);

    let report = callback
        .handle_url("https://app.test/onedrive/callback?code=code-for-p1&state=p1")
        .await
        .unwrap();
    assert_eq!(report.project_id.as_deref(), Some("p1"));
    let target = callback_window.redirects().pop().unwrap();
    assert_eq!(
        ReturnFlags::from_url(&target),
        Some(ReturnFlags::connected("p1").for_provider(CloudProvider::OneDrive))
    );

    h.linker.reconcile_return(&target).await.unwrap().unwrap();
    assert_eq!(
        h.linker.session("p1").await.unwrap().status,
        LinkStatus::Succeeded
    );
    assert_eq!(
        h.linker.session("p2").await.unwrap().status,
        LinkStatus::AwaitingCallback
    );

    // p2 is now the only pending project.
    let report = callback
        .handle_url("https://app.test/onedrive/callback?code=code-for-p2")
        .await
        .unwrap();
    assert_eq!(report.project_id.as_deref(), Some("p2"));
    let exchange = h
        .routes
        .requests()
        .into_iter()
        .filter(|r| r.url.ends_with("/authorize"))
        .last()
        .unwrap();
    let body: serde_json::Value =
        serde_json::from_slice(exchange.body.as_deref().unwrap_or_default()).unwrap();
    assert_eq!(body, json!({"code": "code-for-p2", "projectId": "p2"}));
    assert_eq!(
        h.settings
            .get_string("pending_link_project:onedrive")
            .await
            .unwrap(),
        None
    );
}
