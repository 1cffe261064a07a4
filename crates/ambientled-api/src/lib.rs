// ambientled-api: WebSocket transport and wire codec for the AmbientLed backend

pub mod backoff;
pub mod error;
pub mod frame;
mod tls;
pub mod transport;
pub mod ws;

pub use backoff::{Backoff, ReconnectConfig};
pub use error::Error;
pub use frame::{EffectList, FrameCodec, Inbound, JsonCodec, Outbound, RawDevice, RawDeviceData};
pub use transport::{Connector, FrameSink, FrameStream, Link, TlsMode, TransportConfig};
pub use ws::WsConnector;

/// Backend endpoint used when an account does not override it.
pub const DEFAULT_URL: &str = "wss://ambientled.pl";
