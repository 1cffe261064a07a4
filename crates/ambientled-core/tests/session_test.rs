#![allow(clippy::unwrap_used)]
// Session lifecycle tests against an in-memory backend, on a paused clock.

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;

use ambientled_core::{
    Command, ConnectionState, CoreError, DeviceId, ReconnectConfig, SessionConfig,
};
use support::{
    FakeConnector, Plan, config, devices, lamp, next_server, session, session_with,
    wait_for_state,
};

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

async fn wait_for_device(
    session: &ambientled_core::Session,
    id: &str,
    mut pred: impl FnMut(&ambientled_core::Device) -> bool,
) {
    let mut rx = session.registry().watch_devices();
    tokio::time::timeout(
        support::WAIT,
        rx.wait_for(|snap| snap.iter().any(|d| d.id.as_str() == id && pred(d))),
    )
    .await
    .expect("timed out waiting for device state")
    .unwrap();
}

// ── Connect and authenticate ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connects_authenticates_and_loads_devices() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    session.start().await;
    let mut server = next_server(&mut servers).await;

    let auth = server.accept_auth().await;
    assert_eq!(auth["data"]["token"], "tok-1");
    server.serve_devices(&devices()).await;

    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.tokens(), vec!["tok-1".to_owned()]);

    let registry = session.registry();
    assert_eq!(registry.len(), 2);
    let desk = registry.get(&DeviceId::new("dev-1")).unwrap();
    assert_eq!(desk.name, "Desk");
    assert_eq!(desk.brightness, 51);
    assert!(!desk.is_on);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_fails_without_retry_until_token_update() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.reject_auth("token expired").await;

    wait_for_state(&session, |s| *s == ConnectionState::Failed).await;
    assert!(session.reauth_required());
    assert!(session.last_error().unwrap().contains("token expired"));

    // No retry while parked in Failed, however long we wait.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(session.state(), ConnectionState::Failed);

    session
        .update_token(SecretString::from("tok-2".to_owned()))
        .await;
    assert!(!session.reauth_required());

    let mut server = next_server(&mut servers).await;
    let auth = server.accept_auth().await;
    assert_eq!(auth["data"]["token"], "tok-2");
    server.serve_devices(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_upgrade_is_terminal() {
    let (connector, _servers) = FakeConnector::new(Plan::RejectToken);
    let session = session(&connector);

    session.start().await;
    let err = session
        .wait_for_ready(Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AuthFailed { .. }), "got: {err:?}");

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.connects(), 1);
    assert!(session.reauth_required());
}

#[tokio::test(start_paused = true)]
async fn test_auth_timeout_is_retried() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut silent = next_server(&mut servers).await;
    let frame = silent.recv().await;
    assert_eq!(frame["method"], "auth");

    wait_for_state(&session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert!(silent.client_closed());
    assert!(!session.reauth_required());
    assert!(session.last_error().unwrap().contains("timed out"));

    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_list_timeout_reconnects() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.accept_auth().await;
    let request = server.recv().await;
    assert_eq!(request["method"], "getDevicesIntegration");

    wait_for_state(&session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert!(server.client_closed());
    assert_eq!(connector.connects(), 1);

    session.shutdown().await;
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_transport_loss_reconnects_after_backoff() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    server.hang_up();
    wait_for_state(&session, |s| *s == ConnectionState::Reconnecting { attempt: 1 }).await;
    assert!(server.client_closed());

    let mut server = next_server(&mut servers).await;
    let times = connector.connect_times();
    let gap = secs(times[1] - times[0]);
    assert!((0.75..=1.26).contains(&gap), "first retry after {gap}s");

    // Only one device this time: the stale one must go.
    server.handshake(&json!([lamp("dev-1", "Desk")])).await;
    let mut snapshots = session.registry().watch_devices();
    tokio::time::timeout(support::WAIT, snapshots.wait_for(|devices| devices.len() == 1))
        .await
        .unwrap()
        .unwrap();
    assert!(session.registry().get(&DeviceId::new("dev-2")).is_err());

    // A successful connection resets the attempt counter.
    server.hang_up();
    wait_for_state(&session, |s| *s == ConnectionState::Reconnecting { attempt: 1 }).await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_between_failed_attempts() {
    let (connector, _servers) = FakeConnector::new(Plan::Refuse);
    let session = session(&connector);

    session.start().await;
    while connector.connects() < 4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let times = connector.connect_times();
    let windows = [(0.75, 1.25), (1.5, 2.5), (3.0, 5.0)];
    for (i, (lo, hi)) in windows.iter().enumerate() {
        let gap = secs(times[i + 1] - times[i]);
        assert!(
            gap >= lo - 0.01 && gap <= hi + 0.01,
            "gap {i} was {gap}s, expected {lo}..{hi}"
        );
    }
    assert!(matches!(
        session.state(),
        ConnectionState::Reconnecting { .. } | ConnectionState::Connecting
    ));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit_ends_in_failed() {
    let (connector, _servers) = FakeConnector::new(Plan::Refuse);
    let session = session_with(
        SessionConfig {
            reconnect: ReconnectConfig {
                max_retries: Some(2),
                ..ReconnectConfig::default()
            },
            ..config()
        },
        &connector,
    );

    session.start().await;
    wait_for_state(&session, |s| *s == ConnectionState::Failed).await;

    assert_eq!(connector.connects(), 3);
    assert!(!session.reauth_required());
    let err = session
        .wait_for_ready(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConnectionFailed { .. }), "got: {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_attempts_never_overlap() {
    let (connector, _servers) = FakeConnector::with_delay(Plan::Refuse, Duration::from_secs(2));
    let session = session(&connector);

    tokio::join!(session.start(), session.start(), session.start());
    while connector.connects() < 4 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        session.start().await;
    }

    assert_eq!(connector.max_in_flight(), 1);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_live_connection() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    for _ in 0..3 {
        let mut server = next_server(&mut servers).await;
        server.handshake(&devices()).await;
        wait_for_state(&session, |s| *s == ConnectionState::Connected).await;
        session.start().await;
        server.hang_up();
        wait_for_state(&session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    }

    assert_eq!(connector.max_live_links(), 1);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notice_with_auth_code_requires_reauth() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    server.send(&json!({
        "method": "disconnect",
        "data": { "code": 4401, "reason": "token revoked" }
    }));

    wait_for_state(&session, |s| *s == ConnectionState::Failed).await;
    assert!(session.reauth_required());
    assert!(server.client_closed());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notice_during_auth_without_auth_code_is_retried() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    let auth = server.recv().await;
    assert_eq!(auth["method"], "auth");
    server.send(&json!({
        "method": "disconnect",
        "data": { "code": 4001, "reason": "maintenance" }
    }));

    wait_for_state(&session, |s| *s == ConnectionState::Reconnecting { attempt: 1 }).await;
    assert!(!session.reauth_required());
    assert!(session.last_error().unwrap().contains("maintenance"));

    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;
    assert_eq!(connector.connects(), 2);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notice_during_auth_with_auth_code_requires_reauth() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    let auth = server.recv().await;
    assert_eq!(auth["method"], "auth");
    server.send(&json!({
        "method": "disconnect",
        "data": { "code": 4403, "reason": "forbidden" }
    }));

    wait_for_state(&session, |s| *s == ConnectionState::Failed).await;
    assert!(session.reauth_required());
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notice_while_connected_reconnects() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    server.send(&json!({
        "method": "disconnect",
        "data": { "code": 1001, "reason": "going away" }
    }));

    wait_for_state(&session, |s| *s == ConnectionState::Reconnecting { attempt: 1 }).await;
    assert!(!session.reauth_required());
    assert!(server.client_closed());

    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;

    session.shutdown().await;
}

// ── Connected behavior ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pushed_state_updates_registry() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    // Noise that must be ignored without dropping the connection.
    server.send_text("pong");
    server.send_text("{not json");
    server.send(&json!({ "method": "deviceUpdate", "data": { "_id": "ghost", "data": {} } }));

    server.send(&json!({
        "method": "deviceUpdate",
        "data": { "_id": "dev-1", "data": { "lighting": true, "brightness": 50 } }
    }));
    wait_for_device(&session, "dev-1", |d| d.is_on).await;

    let desk = session.registry().get(&DeviceId::new("dev-1")).unwrap();
    assert_eq!(desk.brightness, 128);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.connects(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_while_idle() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert!(server.pings() >= 3, "only {} pings", server.pings());
    assert_eq!(session.state(), ConnectionState::Connected);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_command_is_written_and_applied_optimistically() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    let id = DeviceId::new("dev-1");
    session
        .submit(&id, Command::SetBrightness { brightness: 128 })
        .await
        .unwrap();

    let frame = server.recv().await;
    assert_eq!(frame["method"], "updateParams");
    assert_eq!(frame["data"]["id"], "dev-1");
    assert_eq!(frame["data"]["data"], json!({ "brightness": 50 }));
    assert_eq!(session.registry().get(&id).unwrap().brightness, 128);

    // A later pushed state wins over the optimistic value.
    server.send(&json!({
        "method": "deviceUpdate",
        "data": { "_id": "dev-1", "data": { "brightness": 10 } }
    }));
    wait_for_device(&session, "dev-1", |d| d.brightness == 26).await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_brightness_matches_what_the_backend_echoes() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    let id = DeviceId::new("dev-1");
    session
        .submit(&id, Command::SetBrightness { brightness: 200 })
        .await
        .unwrap();

    let frame = server.recv().await;
    assert_eq!(frame["data"]["data"], json!({ "brightness": 78 }));
    assert_eq!(session.registry().get(&id).unwrap().brightness, 199);

    // The echo of our own write changes nothing.
    server.send(&json!({
        "method": "deviceUpdate",
        "data": { "_id": "dev-1", "data": { "brightness": 78 } }
    }));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.registry().get(&id).unwrap().brightness, 199);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_state_pushed_right_after_a_command_wins() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    // The backend answers the write with its own state before the caller
    // has even seen the command resolve.
    let backend = tokio::spawn(async move {
        let frame = server.recv().await;
        assert_eq!(frame["method"], "updateParams");
        server.send(&json!({
            "method": "deviceUpdate",
            "data": { "_id": "dev-1", "data": { "brightness": 10 } }
        }));
        server
    });

    let id = DeviceId::new("dev-1");
    session
        .submit(&id, Command::SetBrightness { brightness: 200 })
        .await
        .unwrap();
    let server = backend.await.unwrap();

    wait_for_device(&session, "dev-1", |d| d.brightness == 26).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.registry().get(&id).unwrap().brightness, 26);

    session.shutdown().await;
    drop(server);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_update_refreshes_the_device() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    let id = DeviceId::new("dev-1");
    session
        .submit(&id, Command::SetPower { on: true })
        .await
        .unwrap();
    assert!(session.registry().get(&id).unwrap().is_on);

    let frame = server.recv().await;
    assert_eq!(frame["method"], "updateParams");
    server.send(&json!({
        "method": "updateParams",
        "id": frame["id"],
        "status": false,
        "data": { "error": "device offline" }
    }));

    let refresh = server.recv().await;
    assert_eq!(refresh["method"], "getDevice");
    assert_eq!(refresh["data"]["id"], "dev-1");
    server.send(&json!({
        "method": "getDevice",
        "id": refresh["id"],
        "status": true,
        "data": { "_id": "dev-1", "name": "Desk", "data": { "lighting": false } }
    }));

    wait_for_device(&session, "dev-1", |d| !d.is_on).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.connects(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_uncorrelated_rejection_reloads_the_device_list() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    let id = DeviceId::new("dev-2");
    session
        .submit(&id, Command::SetPower { on: false })
        .await
        .unwrap();
    assert!(!session.registry().get(&id).unwrap().is_on);
    server.recv().await;

    server.send(&json!({
        "method": "updateParams",
        "status": false,
        "data": { "error": "busy" }
    }));

    // The reload reports the plug still on.
    server.serve_devices(&devices()).await;
    wait_for_device(&session, "dev-2", |d| d.is_on).await;
    assert_eq!(session.state(), ConnectionState::Connected);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_positive_ack_needs_no_refresh() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    session
        .submit(&DeviceId::new("dev-1"), Command::SetPower { on: true })
        .await
        .unwrap();
    let frame = server.recv().await;
    server.send(&json!({ "method": "updateParams", "id": frame["id"], "status": true }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(server.try_recv().is_none());
    assert!(session.registry().get(&DeviceId::new("dev-1")).unwrap().is_on);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_fail_fast_while_reconnecting_and_are_never_replayed() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    server.hang_up();
    wait_for_state(&session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

    let started = tokio::time::Instant::now();
    let err = session
        .submit(&DeviceId::new("dev-1"), Command::SetPower { on: true })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotConnected), "got: {err:?}");
    assert!(started.elapsed() < Duration::from_millis(10));
    assert!(!session.registry().get(&DeviceId::new("dev-1")).unwrap().is_on);

    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    wait_for_state(&session, |s| *s == ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(server.try_recv().is_none(), "command was replayed");

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_command_validation_happens_before_sending() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    let err = session
        .submit(&DeviceId::new("nope"), Command::SetPower { on: true })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownDevice { .. }));

    let err = session
        .submit(
            &DeviceId::new("dev-2"),
            Command::SetEffect {
                effect: "Fire".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unsupported { .. }));

    let err = session
        .submit(
            &DeviceId::new("dev-1"),
            Command::SetEffect {
                effect: "Lava".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidCommand { .. }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(server.try_recv().is_none());

    session.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_update_right_after_rejection_always_reconnects() {
    for round in 0..20 {
        let (connector, mut servers) = FakeConnector::new(Plan::Accept);
        connector.push(Plan::RejectToken);
        let session = session(&connector);
        let mut reauth = session.reauth_flag();

        session.start().await;
        tokio::time::timeout(support::WAIT, reauth.wait_for(|flag| *flag))
            .await
            .unwrap()
            .unwrap();
        // No yielding: the supervisor may still be on its way out.
        session
            .update_token(SecretString::from(format!("tok-{round}")))
            .await;

        let mut server = next_server(&mut servers).await;
        server.handshake(&devices()).await;
        wait_for_state(&session, |s| *s == ConnectionState::Connected).await;
        assert_eq!(connector.connects(), 2, "round {round}");

        session.shutdown().await;
    }
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_is_prompt() {
    let (connector, _servers) = FakeConnector::new(Plan::Refuse);
    let session = session(&connector);

    session.start().await;
    wait_for_state(&session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

    let started = tokio::time::Instant::now();
    session.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let connects = connector.connects();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connects(), connects);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_connecting_is_prompt() {
    let (connector, _servers) = FakeConnector::new(Plan::Hang);
    let session = session(&connector);

    session.start().await;
    wait_for_state(&session, |s| *s == ConnectionState::Connecting).await;

    let started = tokio::time::Instant::now();
    session.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_connection_and_is_final() {
    let (connector, mut servers) = FakeConnector::new(Plan::Accept);
    let session = session(&connector);

    session.start().await;
    let mut server = next_server(&mut servers).await;
    server.handshake(&devices()).await;
    session.wait_for_ready(Duration::from_secs(30)).await.unwrap();

    session.shutdown().await;
    assert!(server.client_closed());
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // Idempotent, and the session stays down.
    session.shutdown().await;
    session.start().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
