// ── Color conversions ──

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hue/saturation color as used by the host.
///
/// `hue` is in degrees (0..360), `saturation` in percent (0..=100).
/// Brightness travels separately, so the implied value is always 100%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HsColor {
    pub hue: f32,
    pub saturation: f32,
}

impl HsColor {
    /// Build a color, wrapping the hue and clamping the saturation.
    pub fn new(hue: f32, saturation: f32) -> Self {
        Self {
            hue: hue.rem_euclid(360.0),
            saturation: saturation.clamp(0.0, 100.0),
        }
    }

    /// `true` if both components are finite and within range.
    pub fn is_valid(&self) -> bool {
        self.hue.is_finite()
            && self.saturation.is_finite()
            && (0.0..360.0).contains(&self.hue)
            && (0.0..=100.0).contains(&self.saturation)
    }

    pub fn to_hex(self) -> String {
        Rgb::from(self).to_hex()
    }
}

impl fmt::Display for HsColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}°/{:.0}%", self.hue, self.saturation)
    }
}

/// 8-bit RGB triple, the vendor's native color representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    /// Lowercase `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Rgb> for HsColor {
    fn from(rgb: Rgb) -> Self {
        let r = f32::from(rgb.r) / 255.0;
        let g = f32::from(rgb.g) / 255.0;
        let b = f32::from(rgb.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        #[allow(clippy::float_cmp)]
        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max * 100.0 };

        HsColor::new(hue, saturation)
    }
}

impl From<HsColor> for Rgb {
    fn from(hs: HsColor) -> Self {
        let h = hs.hue.rem_euclid(360.0) / 60.0;
        let c = hs.saturation.clamp(0.0, 100.0) / 100.0;
        let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
        let m = 1.0 - c;

        let (r, g, b) = match h {
            h if h < 1.0 => (c, x, 0.0),
            h if h < 2.0 => (x, c, 0.0),
            h if h < 3.0 => (0.0, c, x),
            h if h < 4.0 => (0.0, x, c),
            h if h < 5.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        Self {
            r: to_channel(r + m),
            g: to_channel(g + m),
            b: to_channel(b + m),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
