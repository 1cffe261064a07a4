// ── Session lifecycle ──
//
// One `Session` per account. A single supervisor task owns the connection:
// it connects, authenticates, loads the device list, then multiplexes
// inbound frames, outbound commands and keepalive pings until the link
// dies. Lost connections are retried with jittered exponential backoff;
// a rejected token parks the session in `Failed` until a new one arrives.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ambientled_api::{
    Backoff, Connector, Error as ApiError, FrameCodec, Inbound, JsonCodec, Link, Outbound,
    WsConnector,
};

use crate::command::{Command, CommandDispatcher, CommandEnvelope};
use crate::config::SessionConfig;
use crate::convert;
use crate::error::CoreError;
use crate::model::{Device, DeviceId};
use crate::store::DeviceRegistry;

const COMMAND_CHANNEL_SIZE: usize = 64;
/// Unanswered `updateParams` requests remembered for ack correlation.
const MAX_UNACKED_UPDATES: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal until the token is replaced or the session is restarted.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A long-lived, self-healing connection to the backend for one account.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Does NOT connect on
/// construction; call [`start()`](Self::start).
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    session_id: Uuid,
    token: ArcSwap<SecretString>,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn FrameCodec>,
    registry: Arc<DeviceRegistry>,
    backoff: Backoff,
    connection_state: watch::Sender<ConnectionState>,
    reauth_required: watch::Sender<bool>,
    last_error: ArcSwapOption<String>,
    /// Set while a connect + authenticate attempt is running.
    attempt_in_flight: AtomicBool,
    /// Raised by a supervisor that is exiting on a terminal failure, before
    /// the failure is published.
    gave_up: AtomicBool,
    /// Bumped on every successful authentication.
    epoch: Arc<AtomicU64>,
    next_request_id: AtomicU64,
    command_tx: mpsc::Sender<CommandEnvelope>,
    /// Held by the running supervisor for its whole lifetime.
    command_rx: Mutex<mpsc::Receiver<CommandEnvelope>>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    supervisor: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl Session {
    /// Create a session that talks to the real backend over WebSocket.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let connector = WsConnector::new(config.transport()).map_err(|e| CoreError::Config {
            message: e.to_string(),
        })?;
        Ok(Self::with_connector(
            config,
            Arc::new(connector),
            Arc::new(JsonCodec),
        ))
    }

    /// Create a session with a custom transport and codec.
    pub fn with_connector(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let backoff = Backoff::new(config.reconnect.clone(), session_id.as_u64_pair().0);
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (reauth_required, _) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(SessionInner {
                token: ArcSwap::from_pointee(config.token.clone()),
                config,
                session_id,
                connector,
                codec,
                registry: Arc::new(DeviceRegistry::new()),
                backoff,
                connection_state,
                reauth_required,
                last_error: ArcSwapOption::empty(),
                attempt_in_flight: AtomicBool::new(false),
                gave_up: AtomicBool::new(false),
                epoch: Arc::new(AtomicU64::new(0)),
                next_request_id: AtomicU64::new(1),
                command_tx,
                command_rx: Mutex::new(command_rx),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the supervisor. Idempotent while it is running.
    ///
    /// Has no effect after [`shutdown()`](Self::shutdown).
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.shut_down {
            warn!(session = %self.inner.session_id, "ignoring start on a shut down session");
            return;
        }
        if let Some(handle) = lifecycle.supervisor.take() {
            // A supervisor that gave up is about to return; wait for it
            // instead of mistaking it for a live one.
            if handle.is_finished() || self.inner.gave_up.load(Ordering::Acquire) {
                if let Err(e) = handle.await {
                    warn!(error = %e, "supervisor task ended abnormally");
                }
            } else {
                lifecycle.supervisor = Some(handle);
                debug!("supervisor already running");
                return;
            }
        }

        self.inner.gave_up.store(false, Ordering::Release);
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        lifecycle.supervisor = Some(tokio::spawn(supervise(inner, cancel.clone())));
        lifecycle.cancel = Some(cancel);
        info!(
            session = %self.inner.session_id,
            url = %self.inner.config.url,
            "session started"
        );
    }

    /// Stop the supervisor, close the connection and wait for both.
    ///
    /// Cancels any pending backoff timer. Idempotent; the session ends in
    /// `Disconnected` and cannot be restarted.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let first = !lifecycle.shut_down;
        lifecycle.shut_down = true;

        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = lifecycle.supervisor.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "supervisor task ended abnormally");
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);

        if first {
            info!(session = %self.inner.session_id, "session shut down");
        }
    }

    /// Replace the token used for subsequent connection attempts.
    ///
    /// Clears the reauth flag and, if the session had failed, starts a new
    /// connection right away.
    pub async fn update_token(&self, token: SecretString) {
        self.inner.token.store(Arc::new(token));
        let rejected = *self.inner.reauth_required.borrow();
        self.inner.clear_reauth();
        info!(session = %self.inner.session_id, "token updated");

        if rejected || self.state() == ConnectionState::Failed {
            self.start().await;
        }
    }

    // ── State observation ────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// `true` after the backend rejected the token, until it is replaced.
    pub fn reauth_required(&self) -> bool {
        *self.inner.reauth_required.borrow()
    }

    pub fn reauth_flag(&self) -> watch::Receiver<bool> {
        self.inner.reauth_required.subscribe()
    }

    /// Human-readable description of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.load_full().map(|e| e.as_ref().clone())
    }

    /// Wait until connected with a loaded device list.
    ///
    /// Fails fast if the session reaches `Failed`.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut state = self.connection_state();
        let mut loaded = self.inner.registry.last_full_load();

        let wait = async {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Connected => {
                        if loaded.borrow_and_update().is_some() {
                            return Ok(());
                        }
                    }
                    ConnectionState::Failed => return Err(self.failure()),
                    _ => {}
                }

                tokio::select! {
                    changed = state.changed() => {
                        if changed.is_err() {
                            return Err(CoreError::NotConnected);
                        }
                    }
                    changed = loaded.changed() => {
                        if changed.is_err() {
                            return Err(CoreError::NotConnected);
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    fn failure(&self) -> CoreError {
        let reason = self
            .last_error()
            .unwrap_or_else(|| "connection failed".to_owned());
        if self.reauth_required() {
            CoreError::AuthFailed { message: reason }
        } else {
            CoreError::ConnectionFailed {
                url: self.inner.config.url.to_string(),
                reason,
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// A dispatcher bound to this session.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(
            Arc::clone(&self.inner.registry),
            self.inner.connection_state.subscribe(),
            Arc::clone(&self.inner.epoch),
            self.inner.command_tx.clone(),
            self.inner.config.command_timeout,
        )
    }

    /// Validate and send a command. See [`CommandDispatcher::submit`].
    pub async fn submit(&self, device_id: &DeviceId, command: Command) -> Result<(), CoreError> {
        self.dispatcher().submit(device_id, command).await
    }
}

// ── Supervisor ───────────────────────────────────────────────────

/// How one connection ended.
enum Outcome {
    Cancelled,
    /// The backend refused the token.
    AuthRejected(String),
    /// Not worth retrying (bad URL, unencodable frame).
    Fatal(ApiError),
    /// Retry after backoff. `established` resets the attempt counter.
    Lost { error: ApiError, established: bool },
}

impl Outcome {
    fn from_setup(error: ApiError) -> Self {
        if error.is_auth_failure() {
            Self::AuthRejected(error.to_string())
        } else if error.is_transient() {
            Self::Lost {
                error,
                established: false,
            }
        } else {
            Self::Fatal(error)
        }
    }

    fn from_stop(stop: Stop, established: bool) -> Self {
        match stop {
            Stop::Cancelled => Self::Cancelled,
            Stop::Failed(error) if error.is_auth_failure() => Self::AuthRejected(error.to_string()),
            Stop::Failed(error) => Self::Lost { error, established },
        }
    }
}

/// Why a phase of a live connection stopped.
enum Stop {
    Cancelled,
    Failed(ApiError),
}

impl From<ApiError> for Stop {
    fn from(err: ApiError) -> Self {
        Self::Failed(err)
    }
}

/// Releases the in-flight flag when the attempt ends, however it ends.
struct AttemptGuard<'a>(&'a AtomicBool);

impl<'a> AttemptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn supervise(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let mut commands = inner.command_rx.lock().await;
    let mut attempt: u32 = 0;

    loop {
        let outcome = inner.run_connection(&cancel, &mut commands).await;
        inner.fail_queued_commands(&mut commands);

        match outcome {
            Outcome::Cancelled => break,
            Outcome::AuthRejected(message) => {
                warn!(%message, "token rejected; reauthentication required");
                inner.record_error(message);
                inner.give_up(true);
                return;
            }
            Outcome::Fatal(err) => {
                error!(error = %err, "connection failed permanently");
                inner.record_error(err.to_string());
                inner.give_up(false);
                return;
            }
            Outcome::Lost { error, established } => {
                if established {
                    attempt = 0;
                }
                inner.record_error(error.to_string());

                if !inner.backoff.allows(attempt) {
                    error!(attempts = attempt, "giving up after repeated connection failures");
                    inner.give_up(false);
                    return;
                }

                let delay = inner.backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                inner.set_state(ConnectionState::Reconnecting { attempt });
                warn!(
                    error = %error,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "connection lost, reconnecting"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    inner.set_state(ConnectionState::Disconnected);
}

impl SessionInner {
    fn set_state(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.connection_state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            previous = std::mem::replace(state, next);
            true
        });
        if changed {
            debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    /// Publish a terminal failure. Reauth goes up before `Failed` so state
    /// watchers always see the reason.
    fn give_up(&self, reauth: bool) {
        self.gave_up.store(true, Ordering::Release);
        if reauth {
            self.reauth_required.send_replace(true);
        }
        self.set_state(ConnectionState::Failed);
    }

    fn clear_reauth(&self) {
        self.reauth_required
            .send_if_modified(|flag| std::mem::replace(flag, false));
    }

    fn record_error(&self, message: String) {
        self.last_error.store(Some(Arc::new(message)));
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn fail_queued_commands(&self, commands: &mut mpsc::Receiver<CommandEnvelope>) {
        while let Ok(envelope) = commands.try_recv() {
            let _ = envelope.response_tx.send(Err(CoreError::NotConnected));
        }
    }

    /// One full connection: attempt, then serve until it ends.
    async fn run_connection(
        &self,
        cancel: &CancellationToken,
        commands: &mut mpsc::Receiver<CommandEnvelope>,
    ) -> Outcome {
        let Some(guard) = AttemptGuard::acquire(&self.attempt_in_flight) else {
            return Outcome::Lost {
                error: ApiError::Protocol("connection attempt already in flight".into()),
                established: false,
            };
        };

        self.set_state(ConnectionState::Connecting);
        debug!(url = %self.config.url, "connecting");

        let token = self.token.load_full();
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&self.config.url, &token),
        );
        let mut link = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Cancelled,
            result = connect => match result {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => return Outcome::from_setup(e),
                Err(_) => {
                    return Outcome::Lost {
                        error: ApiError::Timeout {
                            timeout_secs: self.config.connect_timeout.as_secs(),
                        },
                        established: false,
                    };
                }
            },
        };

        // From here on the link is closed on every exit path.
        let outcome = self.drive(&mut link, &token, cancel, commands, guard).await;
        self.close_link(&mut link).await;
        outcome
    }

    async fn drive(
        &self,
        link: &mut Link,
        token: &SecretString,
        cancel: &CancellationToken,
        commands: &mut mpsc::Receiver<CommandEnvelope>,
        guard: AttemptGuard<'_>,
    ) -> Outcome {
        self.set_state(ConnectionState::Authenticating);
        if let Err(stop) = self.authenticate(link, token, cancel).await {
            return Outcome::from_stop(stop, false);
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.clear_reauth();
        self.set_state(ConnectionState::Connected);
        drop(guard);
        info!(url = %self.config.url, epoch, "connected");

        let mut awaiting_list = true;
        let stop = self
            .serve(link, cancel, commands, epoch, &mut awaiting_list)
            .await;
        Outcome::from_stop(stop, !awaiting_list)
    }

    /// Send the auth frame and wait for its result.
    async fn authenticate(
        &self,
        link: &mut Link,
        token: &SecretString,
        cancel: &CancellationToken,
    ) -> Result<(), Stop> {
        let id = self.next_id();
        self.send(
            link,
            id,
            &Outbound::Auth {
                token: token.clone(),
            },
        )
        .await?;

        let wait = async {
            loop {
                let text = match link.stream.next_text().await {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(ApiError::Closed {
                            code: 1006,
                            reason: "closed during authentication".into(),
                        });
                    }
                };
                match self.codec.decode(&text) {
                    Ok(Some(Inbound::AuthResult { ok: true, .. })) => return Ok(()),
                    Ok(Some(Inbound::AuthResult { ok: false, message, .. })) => {
                        return Err(ApiError::AuthFailed {
                            message: message.unwrap_or_else(|| "token rejected".into()),
                        });
                    }
                    Ok(Some(Inbound::DisconnectNotice { code, reason })) => {
                        return Err(disconnect_error(code, reason));
                    }
                    Ok(Some(other)) => {
                        debug!(kind = other.kind(), "ignoring frame before authentication");
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "undecodable frame during authentication"),
                }
            }
        };

        let timeout = self.config.auth_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Stop::Cancelled),
            result = tokio::time::timeout(timeout, wait) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Stop::Failed(e)),
                Err(_) => Err(Stop::Failed(ApiError::AuthTimeout {
                    timeout_secs: timeout.as_secs(),
                })),
            },
        }
    }

    /// Drive an authenticated connection until it stops.
    async fn serve(
        &self,
        link: &mut Link,
        cancel: &CancellationToken,
        commands: &mut mpsc::Receiver<CommandEnvelope>,
        epoch: u64,
        awaiting_list: &mut bool,
    ) -> Stop {
        let list_id = self.next_id();
        if let Err(e) = self.send(link, list_id, &Outbound::ListDevices).await {
            return Stop::Failed(e);
        }
        let list_deadline = tokio::time::sleep(self.config.request_timeout);
        tokio::pin!(list_deadline);

        let period = self.config.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut unacked: BTreeMap<u64, DeviceId> = BTreeMap::new();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Stop::Cancelled,

                frame = link.stream.next_text() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return Stop::Failed(e),
                        None => {
                            return Stop::Failed(ApiError::Closed {
                                code: 1000,
                                reason: "closed by backend".into(),
                            });
                        }
                    };
                    match self.handle_frame(&text, list_id, awaiting_list, &mut unacked) {
                        Ok(Some(refresh)) => {
                            if let Err(e) = self.send(link, self.next_id(), &refresh).await {
                                return Stop::Failed(e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return Stop::Failed(e),
                    }
                }

                Some(envelope) = commands.recv() => {
                    match self.write_command(link, envelope, epoch).await {
                        Ok(Some((id, device_id))) => {
                            unacked.insert(id, device_id);
                            if unacked.len() > MAX_UNACKED_UPDATES {
                                unacked.pop_first();
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return Stop::Failed(e),
                    }
                }

                () = &mut list_deadline, if *awaiting_list => {
                    warn!("device list request timed out");
                    return Stop::Failed(ApiError::Timeout {
                        timeout_secs: self.config.request_timeout.as_secs(),
                    });
                }

                _ = keepalive.tick() => {
                    if let Err(e) = link.sink.ping().await {
                        return Stop::Failed(e);
                    }
                    debug!("keepalive ping sent");
                }
            }
        }
    }

    /// Apply one inbound frame. `Ok(Some(_))` is a refresh request to send
    /// because the backend refused a command we already applied.
    fn handle_frame(
        &self,
        text: &str,
        list_id: u64,
        awaiting_list: &mut bool,
        unacked: &mut BTreeMap<u64, DeviceId>,
    ) -> Result<Option<Outbound>, ApiError> {
        let frame = match self.codec.decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Ok(None);
            }
        };
        debug!(kind = frame.kind(), "frame received");

        match frame {
            Inbound::DeviceList { devices, .. } => {
                *awaiting_list = false;
                let devices: Vec<Device> = devices.into_iter().map(Device::from).collect();
                info!(devices = devices.len(), "device list loaded");
                self.registry.bulk_load(devices);
            }
            Inbound::DeviceState(raw) => {
                let update = convert::device_update(&raw);
                self.registry.apply_update(&DeviceId::new(raw.id), &update);
            }
            Inbound::Ack {
                id,
                ok: false,
                message,
            } => {
                let message = message.unwrap_or_else(|| "unknown error".into());
                return Ok(Some(Self::refresh_after_rejection(unacked, id, &message)));
            }
            Inbound::Ack { id, .. } => {
                if let Some(id) = id {
                    unacked.remove(&id);
                }
            }
            Inbound::AuthResult { .. } => {}
            Inbound::ErrorNotice { id, message } => {
                if *awaiting_list && id == Some(list_id) {
                    return Err(ApiError::Rejected { message });
                }
                if id.is_some_and(|id| unacked.contains_key(&id)) {
                    return Ok(Some(Self::refresh_after_rejection(unacked, id, &message)));
                }
                warn!(%message, "backend reported an error");
            }
            Inbound::DisconnectNotice { code, reason } => {
                return Err(disconnect_error(code, reason));
            }
            Inbound::Unknown { method } => debug!(%method, "ignoring unknown frame"),
        }
        Ok(None)
    }

    /// The optimistic state of a refused command is wrong; ask for the real
    /// one. Uncorrelated refusals reload the whole list.
    fn refresh_after_rejection(
        unacked: &mut BTreeMap<u64, DeviceId>,
        id: Option<u64>,
        message: &str,
    ) -> Outbound {
        match id.and_then(|id| unacked.remove(&id)) {
            Some(device_id) => {
                warn!(device = %device_id, message, "backend rejected a command; refreshing device");
                Outbound::GetDevice {
                    device_id: device_id.to_string(),
                }
            }
            None => {
                warn!(message, "backend rejected a command; reloading devices");
                Outbound::ListDevices
            }
        }
    }

    /// Write one command and apply its expected state before the next
    /// inbound frame is read, so a later backend state always wins.
    ///
    /// Returns the request id and device of a written command.
    async fn write_command(
        &self,
        link: &mut Link,
        envelope: CommandEnvelope,
        epoch: u64,
    ) -> Result<Option<(u64, DeviceId)>, ApiError> {
        let CommandEnvelope {
            pending,
            response_tx,
        } = envelope;

        if pending.epoch != epoch {
            debug!(device = %pending.device_id, "dropping command issued before reconnect");
            let _ = response_tx.send(Err(CoreError::NotConnected));
            return Ok(None);
        }

        let frame = Outbound::UpdateParams {
            device_id: pending.device_id.to_string(),
            params: convert::command_params(&pending.command),
        };
        let id = self.next_id();
        let text = match self.codec.encode(id, &frame) {
            Ok(text) => text,
            Err(e) => {
                let _ = response_tx.send(Err(CoreError::Internal(e.to_string())));
                return Ok(None);
            }
        };

        match link.sink.send_text(text).await {
            Ok(()) => {
                debug!(kind = frame.kind(), id, device = %pending.device_id, "frame sent");
                self.registry
                    .apply_update(&pending.device_id, &pending.command.expected_update());
                let _ = response_tx.send(Ok(()));
                Ok(Some((id, pending.device_id)))
            }
            Err(e) => {
                let _ = response_tx.send(Err(CoreError::NotConnected));
                Err(e)
            }
        }
    }

    async fn send(&self, link: &mut Link, id: u64, frame: &Outbound) -> Result<(), ApiError> {
        let text = self.codec.encode(id, frame)?;
        link.sink.send_text(text).await?;
        debug!(kind = frame.kind(), id, "frame sent");
        Ok(())
    }

    async fn close_link(&self, link: &mut Link) {
        match tokio::time::timeout(self.config.close_timeout, link.sink.close()).await {
            Ok(Ok(())) => debug!("connection closed"),
            Ok(Err(e)) => debug!(error = %e, "close on a dead link"),
            Err(_) => warn!(
                timeout_secs = self.config.close_timeout.as_secs(),
                "timed out closing connection"
            ),
        }
    }
}

/// Classify a backend disconnect notice. Only auth codes are terminal.
fn disconnect_error(code: Option<u16>, reason: String) -> ApiError {
    if matches!(code, Some(401 | 403 | 4401 | 4403)) {
        ApiError::AuthFailed { message: reason }
    } else {
        ApiError::Closed {
            code: code.unwrap_or(1000),
            reason,
        }
    }
}
