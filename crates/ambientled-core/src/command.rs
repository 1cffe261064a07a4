// ── Command dispatch ──
//
// Host-initiated light commands. The dispatcher validates a command against
// the registry, tags it with the connection epoch and hands it to the
// session's writer. Commands are never queued across a reconnect: anything
// tagged with an older epoch is failed with `NotConnected`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::convert;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceUpdate, HsColor};
use crate::session::ConnectionState;
use crate::store::DeviceRegistry;

/// A light command. Values are in host scale.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPower {
        on: bool,
    },
    SetBrightness {
        brightness: u8,
    },
    SetColor {
        color: HsColor,
    },
    SetEffect {
        effect: String,
    },
    /// Power on and apply any of the given parameters in one frame.
    TurnOn {
        brightness: Option<u8>,
        color: Option<HsColor>,
        effect: Option<String>,
    },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetPower { .. } => "set-power",
            Self::SetBrightness { .. } => "set-brightness",
            Self::SetColor { .. } => "set-color",
            Self::SetEffect { .. } => "set-effect",
            Self::TurnOn { .. } => "turn-on",
        }
    }

    /// The state the device is expected to reach once the backend applies
    /// this command, in the precision the backend reports it back.
    pub(crate) fn expected_update(&self) -> DeviceUpdate {
        match self {
            Self::SetPower { on } => DeviceUpdate {
                is_on: Some(*on),
                ..DeviceUpdate::default()
            },
            Self::SetBrightness { brightness } => DeviceUpdate {
                brightness: Some(convert::echoed_brightness(*brightness)),
                ..DeviceUpdate::default()
            },
            Self::SetColor { color } => DeviceUpdate {
                color: Some(convert::echoed_color(*color)),
                ..DeviceUpdate::default()
            },
            Self::SetEffect { effect } => DeviceUpdate {
                effect: Some(effect.clone()),
                ..DeviceUpdate::default()
            },
            Self::TurnOn {
                brightness,
                color,
                effect,
            } => DeviceUpdate {
                is_on: Some(true),
                brightness: brightness.map(convert::echoed_brightness),
                color: color.map(convert::echoed_color),
                effect: effect.clone(),
                ..DeviceUpdate::default()
            },
        }
    }

    /// Check the command against what the device can do.
    pub fn validate(&self, device: &Device) -> Result<(), CoreError> {
        match self {
            Self::SetPower { .. } => Ok(()),
            Self::SetBrightness { .. } => require_brightness(device),
            Self::SetColor { color } => require_color(device, *color),
            Self::SetEffect { effect } => require_effect(device, effect),
            Self::TurnOn {
                brightness,
                color,
                effect,
            } => {
                if brightness.is_some() {
                    require_brightness(device)?;
                }
                if let Some(color) = color {
                    require_color(device, *color)?;
                }
                if let Some(effect) = effect {
                    require_effect(device, effect)?;
                }
                Ok(())
            }
        }
    }
}

fn unsupported(device: &Device, operation: &str) -> CoreError {
    CoreError::Unsupported {
        operation: operation.to_owned(),
        device: device.id.to_string(),
    }
}

fn require_brightness(device: &Device) -> Result<(), CoreError> {
    if device.capabilities.brightness {
        Ok(())
    } else {
        Err(unsupported(device, "brightness"))
    }
}

fn require_color(device: &Device, color: HsColor) -> Result<(), CoreError> {
    if !device.capabilities.color {
        return Err(unsupported(device, "color"));
    }
    if !color.is_valid() {
        return Err(CoreError::InvalidCommand {
            message: format!(
                "color out of range: hue {} saturation {}",
                color.hue, color.saturation
            ),
        });
    }
    Ok(())
}

fn require_effect(device: &Device, effect: &str) -> Result<(), CoreError> {
    if !device.capabilities.supports_effects() {
        return Err(unsupported(device, "effects"));
    }
    if !device.capabilities.has_effect(effect) {
        return Err(CoreError::InvalidCommand {
            message: format!("effect '{effect}' is not supported by {}", device.name),
        });
    }
    Ok(())
}

/// A validated command waiting for the writer.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub device_id: DeviceId,
    pub command: Command,
    pub enqueued_at: DateTime<Utc>,
    /// Connection generation this command was issued against.
    pub epoch: u64,
}

/// A command envelope sent through the command channel.
pub(crate) struct CommandEnvelope {
    pub pending: PendingCommand,
    pub response_tx: oneshot::Sender<Result<(), CoreError>>,
}

/// Submits commands to the session's connection.
///
/// Cheap to clone; every clone feeds the same writer.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    state: watch::Receiver<ConnectionState>,
    epoch: Arc<AtomicU64>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    timeout: Duration,
}

impl CommandDispatcher {
    pub(crate) fn new(
        registry: Arc<DeviceRegistry>,
        state: watch::Receiver<ConnectionState>,
        epoch: Arc<AtomicU64>,
        command_tx: mpsc::Sender<CommandEnvelope>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            state,
            epoch,
            command_tx,
            timeout,
        }
    }

    /// Validate and send a command.
    ///
    /// Resolves once the frame is written to the connection. The writer
    /// applies the expected state before reading the next inbound frame, so
    /// on success the registry already reflects it and any later pushed
    /// state from the backend overrides it. On any error the registry is
    /// left untouched.
    pub async fn submit(&self, device_id: &DeviceId, command: Command) -> Result<(), CoreError> {
        let device = self
            .registry
            .get(device_id)
            .map_err(|_| CoreError::UnknownDevice {
                id: device_id.to_string(),
            })?;
        command.validate(&device)?;

        if *self.state.borrow() != ConnectionState::Connected {
            return Err(CoreError::NotConnected);
        }

        let pending = PendingCommand {
            device_id: device_id.clone(),
            command,
            enqueued_at: Utc::now(),
            epoch: self.epoch.load(Ordering::Acquire),
        };
        let kind = pending.command.kind();

        let (response_tx, response_rx) = oneshot::channel();
        let envelope = CommandEnvelope {
            pending,
            response_tx,
        };

        let exchange = async {
            self.command_tx
                .send(envelope)
                .await
                .map_err(|_| CoreError::NotConnected)?;
            response_rx.await.map_err(|_| CoreError::NotConnected)?
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        }

        debug!(device = %device_id, kind, "command sent");
        Ok(())
    }
}
