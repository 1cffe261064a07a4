// ── Entity bridge ──
//
// Projects registry devices onto host light entities and routes host
// service calls back into the command dispatcher. The host side is the
// `Host` trait; everything here is host-agnostic.

use std::collections::HashSet;
use std::ops::BitOr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, HsColor};
use crate::session::{ConnectionState, Session};
use crate::store::DeviceChange;

// ── Host surface ─────────────────────────────────────────────────

/// The home-automation host the bridge publishes into.
///
/// Calls are made from the bridge's sync task and must not block.
pub trait Host: Send + Sync + 'static {
    /// Register newly discovered entities.
    fn add_entities(&self, entities: Vec<LightEntity>);
    /// Publish the current state of an already registered entity.
    fn write_state(&self, entity: &LightEntity);
    fn remove_entity(&self, unique_id: &str);
    /// Ask the user for new credentials.
    fn raise_reauth(&self, reason: &str);
    fn clear_reauth(&self);
}

/// Light color modes understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    OnOff,
    Brightness,
    Hs,
}

/// Optional light features, as a bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LightFeatures(u32);

impl LightFeatures {
    pub const EFFECT: Self = Self(4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LightFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A light as presented to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightEntity {
    /// The vendor device id.
    pub unique_id: String,
    pub name: String,
    pub is_on: bool,
    pub brightness: Option<u8>,
    pub hs_color: Option<HsColor>,
    pub effect: Option<String>,
    pub effect_list: Vec<String>,
    pub color_mode: ColorMode,
    pub supported_color_modes: Vec<ColorMode>,
    pub supported_features: LightFeatures,
    pub available: bool,
}

impl LightEntity {
    /// Project a device. `connected` is the session's current link state.
    pub fn from_device(device: &Device, connected: bool) -> Self {
        let caps = &device.capabilities;
        let color_mode = if caps.color {
            ColorMode::Hs
        } else if caps.brightness {
            ColorMode::Brightness
        } else {
            ColorMode::OnOff
        };
        let supported_features = if caps.supports_effects() {
            LightFeatures::EFFECT
        } else {
            LightFeatures::empty()
        };

        Self {
            unique_id: device.id.to_string(),
            name: device.name.clone(),
            is_on: device.is_on,
            brightness: (caps.brightness || caps.color).then_some(device.brightness),
            hs_color: caps.color.then_some(device.color),
            effect: caps
                .supports_effects()
                .then(|| device.effect.clone())
                .flatten(),
            effect_list: caps.effects.clone(),
            color_mode,
            supported_color_modes: vec![color_mode],
            supported_features,
            available: device.online && connected,
        }
    }
}

/// Parameters of a host `turn_on` call. Brightness in 0..=255.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOnParams {
    pub brightness: Option<u8>,
    pub hs_color: Option<HsColor>,
    pub effect: Option<String>,
}

impl TurnOnParams {
    fn into_command(self) -> Command {
        if self.brightness.is_none() && self.hs_color.is_none() && self.effect.is_none() {
            return Command::SetPower { on: true };
        }
        Command::TurnOn {
            brightness: self.brightness,
            color: self.hs_color,
            effect: self.effect,
        }
    }
}

/// Failure of a host service call.
#[derive(Debug, Error)]
pub enum ServiceCallError {
    #[error("Unknown entity: {unique_id}")]
    UnknownEntity { unique_id: String },

    #[error("{unique_id} is unavailable: not connected to the backend")]
    Unavailable { unique_id: String },

    #[error("{unique_id} does not support this call: {source}")]
    NotSupported {
        unique_id: String,
        #[source]
        source: CoreError,
    },

    #[error("Service call on {unique_id} failed: {source}")]
    Failed {
        unique_id: String,
        #[source]
        source: CoreError,
    },
}

impl ServiceCallError {
    fn from_core(unique_id: &str, err: CoreError) -> Self {
        let unique_id = unique_id.to_owned();
        match err {
            CoreError::UnknownDevice { .. } | CoreError::NotFound { .. } => {
                Self::UnknownEntity { unique_id }
            }
            CoreError::NotConnected => Self::Unavailable { unique_id },
            source @ (CoreError::Unsupported { .. } | CoreError::InvalidCommand { .. }) => {
                Self::NotSupported { unique_id, source }
            }
            source => Self::Failed { unique_id, source },
        }
    }
}

// ── Bridge ───────────────────────────────────────────────────────

/// Keeps a host's light entities in sync with one session.
pub struct EntityBridge {
    session: Session,
    host: Arc<dyn Host>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl EntityBridge {
    /// Subscribe to the session, spawn the sync task and start the session.
    pub async fn setup(session: Session, host: Arc<dyn Host>) -> Self {
        let changes = session.registry().subscribe();
        let states = session.connection_state();
        let reauth = session.reauth_flag();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(sync_entities(
            session.clone(),
            Arc::clone(&host),
            changes,
            states,
            reauth,
            cancel.clone(),
        ));

        session.start().await;
        info!(session = %session.id(), "entity bridge set up");

        Self {
            session,
            host,
            cancel,
            sync_task: Mutex::new(Some(task)),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Current projection of one entity.
    pub fn entity(&self, unique_id: &str) -> Option<LightEntity> {
        let device = self
            .session
            .registry()
            .get(&DeviceId::from(unique_id))
            .ok()?;
        Some(LightEntity::from_device(
            &device,
            self.session.is_connected(),
        ))
    }

    /// Current projection of every entity, sorted by name.
    pub fn entities(&self) -> Vec<LightEntity> {
        let connected = self.session.is_connected();
        self.session
            .registry()
            .snapshot()
            .iter()
            .map(|d| LightEntity::from_device(d, connected))
            .collect()
    }

    pub async fn turn_on(
        &self,
        unique_id: &str,
        params: TurnOnParams,
    ) -> Result<(), ServiceCallError> {
        self.session
            .submit(&DeviceId::from(unique_id), params.into_command())
            .await
            .map_err(|e| ServiceCallError::from_core(unique_id, e))
    }

    pub async fn turn_off(&self, unique_id: &str) -> Result<(), ServiceCallError> {
        self.session
            .submit(&DeviceId::from(unique_id), Command::SetPower { on: false })
            .await
            .map_err(|e| ServiceCallError::from_core(unique_id, e))
    }

    /// Tear down: session first, then the sync task. Idempotent.
    pub async fn unload(&self) {
        self.session.shutdown().await;
        self.cancel.cancel();
        if let Some(task) = self.sync_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "entity sync task ended abnormally");
            }
            info!(session = %self.session.id(), "entity bridge unloaded");
        }
    }
}

/// Forward registry changes, availability flips and reauth requests to the
/// host until cancelled.
async fn sync_entities(
    session: Session,
    host: Arc<dyn Host>,
    mut changes: broadcast::Receiver<DeviceChange>,
    mut states: watch::Receiver<ConnectionState>,
    mut reauth: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut known: HashSet<DeviceId> = HashSet::new();
    let mut connected = states.borrow_and_update().is_connected();
    resync(&session, host.as_ref(), &mut known);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            change = changes.recv() => match change {
                Ok(change) => apply_change(&session, host.as_ref(), &mut known, &change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "entity bridge lagged behind registry; resyncing");
                    resync(&session, host.as_ref(), &mut known);
                }
                Err(RecvError::Closed) => break,
            },

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = states.borrow_and_update().is_connected();
                if now != connected {
                    connected = now;
                    debug!(connected, "availability changed for all entities");
                    for entity in current_entities(&session, &known) {
                        host.write_state(&entity);
                    }
                }
            }

            changed = reauth.changed() => {
                if changed.is_err() {
                    break;
                }
                if *reauth.borrow_and_update() {
                    let reason = session
                        .last_error()
                        .unwrap_or_else(|| "token rejected".to_owned());
                    host.raise_reauth(&reason);
                } else {
                    host.clear_reauth();
                }
            }
        }
    }
}

fn apply_change(
    session: &Session,
    host: &dyn Host,
    known: &mut HashSet<DeviceId>,
    change: &DeviceChange,
) {
    match change {
        DeviceChange::Added(_) | DeviceChange::Updated(_) => {
            // Re-read so the host always sees the newest state.
            let Ok(device) = session.registry().get(change.device_id()) else {
                return;
            };
            let entity = LightEntity::from_device(&device, session.is_connected());
            if known.insert(device.id.clone()) {
                host.add_entities(vec![entity]);
            } else {
                host.write_state(&entity);
            }
        }
        DeviceChange::Removed(id) => {
            if known.remove(id) {
                host.remove_entity(id.as_str());
            }
        }
    }
}

/// Reconcile the host with the full registry.
fn resync(session: &Session, host: &dyn Host, known: &mut HashSet<DeviceId>) {
    let connected = session.is_connected();
    let snapshot = session.registry().snapshot();
    let present: HashSet<DeviceId> = snapshot.iter().map(|d| d.id.clone()).collect();

    for gone in known.difference(&present).cloned().collect::<Vec<_>>() {
        known.remove(&gone);
        host.remove_entity(gone.as_str());
    }

    let mut added = Vec::new();
    for device in snapshot.iter() {
        let entity = LightEntity::from_device(device, connected);
        if known.insert(device.id.clone()) {
            added.push(entity);
        } else {
            host.write_state(&entity);
        }
    }
    if !added.is_empty() {
        host.add_entities(added);
    }
}

fn current_entities(session: &Session, known: &HashSet<DeviceId>) -> Vec<LightEntity> {
    let connected = session.is_connected();
    session
        .registry()
        .snapshot()
        .iter()
        .filter(|d| known.contains(&d.id))
        .map(|d| LightEntity::from_device(d, connected))
        .collect()
}
