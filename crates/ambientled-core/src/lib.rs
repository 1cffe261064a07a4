// ambientled-core: Session management, device registry and entity bridge
//
// Sits between the wire layer (ambientled-api) and consumers (CLI or a
// home-automation host). Owns the reconnecting session, the reactive
// device registry and the command path back to the backend.

pub mod bridge;
pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod integration;
pub mod model;
pub mod session;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────
pub use bridge::{
    ColorMode, EntityBridge, Host, LightEntity, LightFeatures, ServiceCallError, TurnOnParams,
};
pub use command::{Command, CommandDispatcher, PendingCommand};
pub use config::{SessionConfig, TlsVerification, default_url};
pub use error::CoreError;
pub use integration::IntegrationManager;
pub use session::{ConnectionState, Session};
pub use store::{DeviceChange, DeviceRegistry};

// Model re-exports
pub use model::{Capabilities, Device, DeviceId, DeviceUpdate, HsColor, Rgb};

// Wire-layer types consumers need for custom transports.
pub use ambientled_api::{Connector, FrameCodec, JsonCodec, ReconnectConfig};
