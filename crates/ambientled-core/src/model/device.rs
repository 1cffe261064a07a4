// ── Device domain types ──

use std::fmt;

use serde::{Deserialize, Serialize};

use super::color::HsColor;

/// Opaque vendor device identifier (the backend's `_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a device can do, derived from the metadata the backend reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub brightness: bool,
    pub color: bool,
    /// Supported effect names. Empty means effects are not supported.
    pub effects: Vec<String>,
}

impl Capabilities {
    pub fn supports_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    /// Case-sensitive lookup, matching what the backend accepts.
    pub fn has_effect(&self, name: &str) -> bool {
        self.effects.iter().any(|e| e == name)
    }
}

/// A light as known to the registry. Scales are host scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub is_on: bool,
    /// 0..=255.
    pub brightness: u8,
    pub color: HsColor,
    pub effect: Option<String>,
    pub online: bool,
    pub capabilities: Capabilities,
}

impl Device {
    /// Merge a partial update. Returns `true` if anything changed.
    pub fn apply(&mut self, update: &DeviceUpdate) -> bool {
        let before = self.clone();

        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(on) = update.is_on {
            self.is_on = on;
        }
        if let Some(brightness) = update.brightness {
            self.brightness = brightness;
            self.capabilities.brightness = true;
        }
        if let Some(color) = update.color {
            self.color = color;
            self.capabilities.color = true;
        }
        if let Some(effect) = &update.effect {
            self.effect = Some(effect.clone());
        }
        if let Some(online) = update.online {
            self.online = online;
        }
        if let Some(effects) = &update.effects {
            self.capabilities.effects.clone_from(effects);
        }

        *self != before
    }
}

/// A partial device state change. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub is_on: Option<bool>,
    pub brightness: Option<u8>,
    pub color: Option<HsColor>,
    pub effect: Option<String>,
    pub online: Option<bool>,
    pub effects: Option<Vec<String>>,
}

impl DeviceUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
