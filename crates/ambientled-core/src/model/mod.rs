// ── Domain model ──
//
// Canonical, host-facing representation of an AmbientLed light. Values are
// already in host scale (brightness 0..=255, hue in degrees, saturation in
// percent); the vendor scale only exists in `convert`.

pub mod color;
pub mod device;

pub use color::{HsColor, Rgb};
pub use device::{Capabilities, Device, DeviceId, DeviceUpdate};
