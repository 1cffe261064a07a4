//! Frame model and codec for the AmbientLed WebSocket protocol.
//!
//! Every frame is a JSON envelope of the shape
//! `{ "method": "...", "id": "...", "status": true, "data": ... }`.
//! Requests carry an `id` that the backend echoes in its response; pushed
//! state updates usually carry none. Bare `ping` / `pong` text frames are
//! keepalive noise and decode to nothing.
//!
//! The [`FrameCodec`] trait is the pluggable boundary: the session only
//! deals in [`Inbound`] / [`Outbound`], so a backend with a different
//! envelope needs a new codec and nothing else.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── Method names ─────────────────────────────────────────────────────

pub const METHOD_AUTH: &str = "auth";
pub const METHOD_LIST_DEVICES: &str = "getDevicesIntegration";
pub const METHOD_LIST_DEVICES_LEGACY: &str = "getDevices";
pub const METHOD_DEVICE: &str = "getDevice";
pub const METHOD_DEVICE_UPDATE: &str = "deviceUpdate";
pub const METHOD_UPDATE_PARAMS: &str = "updateParams";
pub const METHOD_ERROR: &str = "error";
pub const METHOD_DISCONNECT: &str = "disconnect";

// ── Envelope ─────────────────────────────────────────────────────────

/// Raw JSON envelope shared by both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub method: String,

    /// Request id. We send strings; the backend has been seen echoing both
    /// strings and numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,

    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// The numeric request id, if the envelope carries one.
    pub fn request_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Backend-provided error text for a failed response.
    fn error_message(&self) -> String {
        self.data
            .get("error")
            .or_else(|| self.data.get("message"))
            .and_then(Value::as_str)
            .map_or_else(|| "unknown error".to_owned(), str::to_owned)
    }
}

// ── Vendor device payloads ───────────────────────────────────────────

/// A device as the backend describes it.
///
/// Used both for device-list entries and for pushed state updates. In the
/// latter case any field may be missing, meaning "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDevice {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,

    #[serde(default)]
    pub data: RawDeviceData,
}

/// Light parameters nested under a device's `data` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceData {
    /// Power state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<bool>,

    /// Vendor brightness, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,

    /// `#rrggbb` hex color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Supported effects, either a JSON array or a comma-separated string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<EffectList>,
}

/// The two shapes the backend uses for the effect catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EffectList {
    List(Vec<String>),
    Csv(String),
}

impl EffectList {
    /// Normalized effect names: trimmed, empties dropped.
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Csv(s) => s.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

// ── Decoded frames ───────────────────────────────────────────────────

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to an [`Outbound::Auth`] request.
    AuthResult {
        id: Option<u64>,
        ok: bool,
        message: Option<String>,
    },
    /// Full device list, either requested or pushed.
    DeviceList {
        id: Option<u64>,
        devices: Vec<RawDevice>,
    },
    /// Partial state for a single device.
    DeviceState(RawDevice),
    /// Answer to an [`Outbound::UpdateParams`] request.
    Ack {
        id: Option<u64>,
        ok: bool,
        message: Option<String>,
    },
    /// Backend-reported error, possibly tied to a request.
    ErrorNotice { id: Option<u64>, message: String },
    /// The backend is about to drop us.
    DisconnectNotice { code: Option<u16>, reason: String },
    /// Anything we do not understand. Logged and dropped.
    Unknown { method: String },
}

impl Inbound {
    /// Short frame kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthResult { .. } => "auth-result",
            Self::DeviceList { .. } => "device-list",
            Self::DeviceState(_) => "device-state-update",
            Self::Ack { .. } => "ack",
            Self::ErrorNotice { .. } => "error",
            Self::DisconnectNotice { .. } => "disconnect-notice",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// An outbound request.
#[derive(Debug, Clone)]
pub enum Outbound {
    Auth { token: SecretString },
    ListDevices,
    /// Fresh state for one device; answered with a device payload.
    GetDevice {
        device_id: String,
    },
    UpdateParams {
        device_id: String,
        params: Map<String, Value>,
    },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth-request",
            Self::ListDevices => "device-list-request",
            Self::GetDevice { .. } => "device-request",
            Self::UpdateParams { .. } => "update-params",
        }
    }
}

// ── Codec ────────────────────────────────────────────────────────────

/// Translates between text frames and [`Inbound`] / [`Outbound`].
pub trait FrameCodec: Send + Sync {
    /// Encode a request tagged with `id`.
    fn encode(&self, id: u64, frame: &Outbound) -> Result<String, Error>;

    /// Decode a text frame. `Ok(None)` means keepalive noise.
    fn decode(&self, text: &str) -> Result<Option<Inbound>, Error>;
}

/// The JSON envelope codec spoken by the AmbientLed backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn encode(&self, id: u64, frame: &Outbound) -> Result<String, Error> {
        let (method, data) = match frame {
            Outbound::Auth { token } => (
                METHOD_AUTH,
                serde_json::json!({ "token": token.expose_secret() }),
            ),
            Outbound::ListDevices => (METHOD_LIST_DEVICES, Value::Object(Map::new())),
            Outbound::GetDevice { device_id } => {
                (METHOD_DEVICE, serde_json::json!({ "id": device_id }))
            }
            Outbound::UpdateParams { device_id, params } => (
                METHOD_UPDATE_PARAMS,
                serde_json::json!({ "id": device_id, "data": params }),
            ),
        };

        let envelope = Envelope {
            method: method.to_owned(),
            id: Some(Value::String(id.to_string())),
            status: None,
            data,
        };
        serde_json::to_string(&envelope).map_err(|e| Error::Protocol(e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Option<Inbound>, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("ping")
            || trimmed.eq_ignore_ascii_case("pong")
        {
            return Ok(None);
        }

        let envelope: Envelope =
            serde_json::from_str(trimmed).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: truncate(trimmed, 200),
            })?;

        Ok(Some(classify(envelope)?))
    }
}

/// Map an envelope onto an [`Inbound`] variant.
fn classify(envelope: Envelope) -> Result<Inbound, Error> {
    let id = envelope.request_id();
    let failed = envelope.status == Some(false);

    let frame = match envelope.method.as_str() {
        METHOD_AUTH => Inbound::AuthResult {
            id,
            ok: !failed,
            message: failed.then(|| envelope.error_message()),
        },
        METHOD_UPDATE_PARAMS => Inbound::Ack {
            id,
            ok: !failed,
            message: failed.then(|| envelope.error_message()),
        },
        _ if failed => Inbound::ErrorNotice {
            id,
            message: envelope.error_message(),
        },
        METHOD_LIST_DEVICES | METHOD_LIST_DEVICES_LEGACY => Inbound::DeviceList {
            id,
            devices: parse_device_list(&envelope.data)?,
        },
        METHOD_ERROR => Inbound::ErrorNotice {
            id,
            message: envelope.error_message(),
        },
        METHOD_DISCONNECT => Inbound::DisconnectNotice {
            code: envelope
                .data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
            reason: envelope
                .data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned(),
        },
        method => match parse_device(&envelope.data) {
            // getDevice / deviceUpdate, and any other frame whose payload is
            // a device object.
            Some(device) => Inbound::DeviceState(device),
            None => Inbound::Unknown {
                method: method.to_owned(),
            },
        },
    };
    Ok(frame)
}

/// Parse a device-list payload, skipping entries without `_id` or `name`.
fn parse_device_list(data: &Value) -> Result<Vec<RawDevice>, Error> {
    let Some(items) = data.as_array() else {
        return Err(Error::Deserialization {
            message: "expected device list array".into(),
            body: truncate(&data.to_string(), 200),
        });
    };

    let mut devices = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<RawDevice>(item.clone()) {
            Ok(dev) if !dev.id.is_empty() && dev.name.is_some() => devices.push(dev),
            Ok(_) | Err(_) => {
                tracing::warn!(
                    entry = %truncate(&item.to_string(), 100),
                    "skipping invalid device entry"
                );
            }
        }
    }
    Ok(devices)
}

fn parse_device(data: &Value) -> Option<RawDevice> {
    if !data.is_object() || data.get("_id").is_none() {
        return None;
    }
    serde_json::from_value(data.clone()).ok()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Tests ────────────────────────────────────────────────────────────
