// Shared fakes for session and bridge tests.
//
// `FakeConnector` hands out in-memory links; the test drives the backend
// side of each one through a `ServerEnd`.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use ambientled_api::{Connector, Error, FrameSink, FrameStream, Link};
use ambientled_core::{ConnectionState, Host, LightEntity, Session, SessionConfig};

/// Generous upper bound; with a paused clock it only trips on real hangs.
pub const WAIT: Duration = Duration::from_secs(3600);

// ── Connector ───────────────────────────────────────────────────────

/// What the next `connect()` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    Refuse,
    /// HTTP 401 on upgrade.
    RejectToken,
    /// Never completes.
    Hang,
}

pub struct FakeConnector {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    delay: Duration,
    servers: mpsc::UnboundedSender<ServerEnd>,
    connect_times: Mutex<Vec<Instant>>,
    tokens: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    live_links: Arc<AtomicUsize>,
    max_live_links: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(fallback: Plan) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::with_delay(fallback, Duration::ZERO)
    }

    pub fn with_delay(
        fallback: Plan,
        delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plans: Mutex::new(VecDeque::new()),
            fallback,
            delay,
            servers,
            connect_times: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            live_links: Arc::new(AtomicUsize::new(0)),
            max_live_links: Arc::new(AtomicUsize::new(0)),
        });
        (connector, rx)
    }

    /// Queue a plan ahead of the fallback.
    pub fn push(&self, plan: Plan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn connects(&self) -> usize {
        self.connect_times.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    /// Tokens presented on upgrade, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_live_links(&self) -> usize {
        self.max_live_links.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &Url, token: &SecretString) -> Result<Link, Error> {
        self.connect_times.lock().unwrap().push(Instant::now());
        self.tokens
            .lock()
            .unwrap()
            .push(token.expose_secret().to_owned());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = Decrement(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match plan {
            Plan::Refuse => Err(Error::Connect("connection refused".into())),
            Plan::RejectToken => Err(Error::AuthFailed {
                message: "HTTP 401 Unauthorized".into(),
            }),
            Plan::Hang => std::future::pending().await,
            Plan::Accept => {
                let (link, server) = pair(&self.live_links, &self.max_live_links);
                self.servers.send(server).unwrap();
                Ok(link)
            }
        }
    }
}

struct Decrement<'a>(&'a AtomicUsize);

impl Drop for Decrement<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── In-memory link ──────────────────────────────────────────────────

fn pair(live: &Arc<AtomicUsize>, max_live: &Arc<AtomicUsize>) -> (Link, ServerEnd) {
    let (client_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, client_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let pings = Arc::new(AtomicUsize::new(0));

    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
    max_live.fetch_max(now, Ordering::SeqCst);

    let link = Link {
        sink: Box::new(FakeSink {
            tx: client_tx,
            closed: Arc::clone(&closed),
            pings: Arc::clone(&pings),
            live: Arc::clone(live),
        }),
        stream: Box::new(FakeStream { rx: client_rx }),
    };
    let server = ServerEnd {
        from_client,
        to_client: Some(to_client),
        closed,
        pings,
    };
    (link, server)
}

struct FakeSink {
    tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    pings: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.tx.send(text).map_err(|_| Error::Closed {
            code: 1006,
            reason: "server gone".into(),
        })
    }

    async fn ping(&mut self) -> Result<(), Error> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeStream {
    rx: mpsc::UnboundedReceiver<Result<String, Error>>,
}

#[async_trait]
impl FrameStream for FakeStream {
    async fn next_text(&mut self) -> Option<Result<String, Error>> {
        self.rx.recv().await
    }
}

// ── Backend side ────────────────────────────────────────────────────

pub struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<Result<String, Error>>>,
    closed: Arc<AtomicBool>,
    pings: Arc<AtomicUsize>,
}

impl ServerEnd {
    /// Next frame the client sent, parsed as JSON.
    pub async fn recv(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client went away");
        serde_json::from_str(&text).unwrap()
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.from_client
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    pub fn send(&self, frame: &Value) {
        self.send_text(&frame.to_string());
    }

    pub fn send_text(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text.to_owned()));
        }
    }

    /// Drop the connection from the backend side.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Expect the auth frame and accept it. Returns the frame.
    pub async fn accept_auth(&mut self) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], "auth");
        self.send(&json!({ "method": "auth", "id": frame["id"], "status": true }));
        frame
    }

    pub async fn reject_auth(&mut self, message: &str) {
        let frame = self.recv().await;
        assert_eq!(frame["method"], "auth");
        self.send(&json!({
            "method": "auth",
            "id": frame["id"],
            "status": false,
            "data": { "error": message }
        }));
    }

    /// Expect the device-list request and answer it.
    pub async fn serve_devices(&mut self, devices: &Value) {
        let frame = self.recv().await;
        assert_eq!(frame["method"], "getDevicesIntegration");
        self.send(&json!({
            "method": "getDevicesIntegration",
            "id": frame["id"],
            "status": true,
            "data": devices
        }));
    }

    pub async fn handshake(&mut self, devices: &Value) {
        self.accept_auth().await;
        self.serve_devices(devices).await;
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// A dimmable color light with effects, initially off.
pub fn lamp(id: &str, name: &str) -> Value {
    json!({
        "_id": id,
        "name": name,
        "online": true,
        "data": {
            "lighting": false,
            "brightness": 20,
            "color": "#ff0000",
            "effect": "Fire",
            "effects": ["Fire", "Rain", "Disco"]
        }
    })
}

/// An on/off-only device.
pub fn plug(id: &str, name: &str) -> Value {
    json!({ "_id": id, "name": name, "online": true, "data": { "lighting": true } })
}

pub fn devices() -> Value {
    json!([lamp("dev-1", "Desk"), plug("dev-2", "Porch")])
}

pub fn config() -> SessionConfig {
    SessionConfig::new(
        Url::parse("ws://backend.test/").unwrap(),
        SecretString::from("tok-1".to_owned()),
    )
}

pub fn session(connector: &Arc<FakeConnector>) -> Session {
    session_with(config(), connector)
}

pub fn session_with(config: SessionConfig, connector: &Arc<FakeConnector>) -> Session {
    Session::with_connector(
        config,
        Arc::clone(connector) as Arc<dyn Connector>,
        Arc::new(ambientled_api::JsonCodec),
    )
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub async fn wait_for_state(session: &Session, pred: impl FnMut(&ConnectionState) -> bool) {
    let mut rx = session.connection_state();
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for connection state")
        .unwrap();
}

// ── Host ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Added(Vec<LightEntity>),
    State(LightEntity),
    Removed(String),
    ReauthRaised(String),
    ReauthCleared,
}

/// Records every host call.
pub struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
    version: watch::Sender<u64>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            version,
        })
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
        self.version.send_modify(|v| *v += 1);
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Most recent published state of an entity.
    pub fn latest(&self, unique_id: &str) -> Option<LightEntity> {
        self.events().into_iter().rev().find_map(|event| match event {
            HostEvent::State(entity) if entity.unique_id == unique_id => Some(entity),
            HostEvent::Added(entities) => {
                entities.into_iter().find(|e| e.unique_id == unique_id)
            }
            _ => None,
        })
    }

    pub async fn wait_until(&self, mut pred: impl FnMut(&Self) -> bool) {
        let mut rx = self.version.subscribe();
        let wait = async {
            loop {
                if pred(self) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .expect("timed out waiting for host events");
    }
}

impl Host for RecordingHost {
    fn add_entities(&self, entities: Vec<LightEntity>) {
        self.record(HostEvent::Added(entities));
    }

    fn write_state(&self, entity: &LightEntity) {
        self.record(HostEvent::State(entity.clone()));
    }

    fn remove_entity(&self, unique_id: &str) {
        self.record(HostEvent::Removed(unique_id.to_owned()));
    }

    fn raise_reauth(&self, reason: &str) {
        self.record(HostEvent::ReauthRaised(reason.to_owned()));
    }

    fn clear_reauth(&self) {
        self.record(HostEvent::ReauthCleared);
    }
}
