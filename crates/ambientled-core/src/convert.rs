// ── Wire-to-domain conversions ──
//
// Bridges raw `ambientled_api` payloads into `model` types and back. This
// is the only place that knows the vendor scales: brightness 0..=100 and
// `#rrggbb` colors on the wire, 0..=255 and hue/saturation in the model.

use serde_json::{Map, Value};

use ambientled_api::{RawDevice, RawDeviceData};

use crate::command::Command;
use crate::model::{Capabilities, Device, DeviceId, DeviceUpdate, HsColor, Rgb};

// ── Scales ─────────────────────────────────────────────────────────

/// Vendor brightness (0..=100) to host brightness (0..=255).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
pub fn host_brightness(vendor: f64) -> u8 {
    if !vendor.is_finite() {
        return 0;
    }
    (vendor.clamp(0.0, 100.0) * 255.0 / 100.0).round() as u8
}

/// Host brightness (0..=255) to vendor brightness (0..=100).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
pub fn vendor_brightness(host: u8) -> u8 {
    (f64::from(host) * 100.0 / 255.0).round() as u8
}

/// The host brightness the backend will echo after `host` is sent.
pub fn echoed_brightness(host: u8) -> u8 {
    host_brightness(f64::from(vendor_brightness(host)))
}

/// The color the backend will echo once `color` has been sent as hex.
pub fn echoed_color(color: HsColor) -> HsColor {
    HsColor::from(Rgb::from(color))
}

fn parse_color(raw: Option<&str>) -> Option<HsColor> {
    let raw = raw?;
    match Rgb::from_hex(raw) {
        Some(rgb) => Some(HsColor::from(rgb)),
        None => {
            tracing::debug!(color = raw, "ignoring unparseable color");
            None
        }
    }
}

// ── Device ─────────────────────────────────────────────────────────

/// Build a full device from a device-list entry.
///
/// Capabilities come from which parameters the backend reports for the
/// device; a light without a `brightness` key is treated as on/off only.
impl From<RawDevice> for Device {
    fn from(raw: RawDevice) -> Self {
        let RawDeviceData {
            lighting,
            brightness,
            color,
            effect,
            effects,
        } = raw.data;

        let parsed_color = parse_color(color.as_deref());

        Device {
            name: raw.name.unwrap_or_else(|| raw.id.clone()),
            id: DeviceId::new(raw.id),
            is_on: lighting.unwrap_or(false),
            brightness: brightness.map_or(0, host_brightness),
            color: parsed_color.unwrap_or_default(),
            effect: effect.filter(|e| !e.is_empty()),
            online: raw.online.unwrap_or(true),
            capabilities: Capabilities {
                brightness: brightness.is_some(),
                color: color.is_some(),
                effects: effects.map(|e| e.names()).unwrap_or_default(),
            },
        }
    }
}

/// Extract a partial update from a pushed device-state frame.
pub fn device_update(raw: &RawDevice) -> DeviceUpdate {
    let data = &raw.data;
    DeviceUpdate {
        name: raw.name.clone(),
        is_on: data.lighting,
        brightness: data.brightness.map(host_brightness),
        color: parse_color(data.color.as_deref()),
        effect: data.effect.clone().filter(|e| !e.is_empty()),
        online: raw.online,
        effects: data.effects.as_ref().map(ambientled_api::EffectList::names),
    }
}

// ── Commands ───────────────────────────────────────────────────────

/// Vendor `updateParams` payload for a command.
pub fn command_params(command: &Command) -> Map<String, Value> {
    let mut params = Map::new();
    match command {
        Command::SetPower { on } => {
            params.insert("lighting".into(), Value::Bool(*on));
        }
        Command::SetBrightness { brightness } => {
            params.insert("brightness".into(), Value::from(vendor_brightness(*brightness)));
        }
        Command::SetColor { color } => {
            params.insert("color".into(), Value::String(color.to_hex()));
        }
        Command::SetEffect { effect } => {
            params.insert("effect".into(), Value::String(effect.clone()));
        }
        Command::TurnOn {
            brightness,
            color,
            effect,
        } => {
            params.insert("lighting".into(), Value::Bool(true));
            if let Some(b) = brightness {
                params.insert("brightness".into(), Value::from(vendor_brightness(*b)));
            }
            if let Some(c) = color {
                params.insert("color".into(), Value::String(c.to_hex()));
            }
            if let Some(e) = effect {
                params.insert("effect".into(), Value::String(e.clone()));
            }
        }
    }
    params
}
