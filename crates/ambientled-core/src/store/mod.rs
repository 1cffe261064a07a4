// ── Device state store ──

mod registry;

pub use registry::{DeviceChange, DeviceRegistry};
