// Transport abstraction shared by the real WebSocket connector and test fakes.
//
// A `Connector` opens one connection and hands back a `Link`, already split
// into its write half (`FrameSink`) and read half (`FrameStream`) so a single
// owner can drive both from one select loop.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use url::Url;

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the bundled webpki root store.
    #[default]
    System,
    /// Trust only the CA certificate(s) in the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Connection-level settings for building a connector.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Upper bound on TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("ambientled-rs/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), Error>;

    /// Send a protocol-level keepalive ping.
    async fn ping(&mut self) -> Result<(), Error>;

    /// Send a close frame and flush. Safe to call on an already-dead link.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Read half of a connection.
///
/// Yields text frames until the peer closes (`None`) or the link errors.
/// After `None` or an error the stream is finished for good.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_text(&mut self) -> Option<Result<String, Error>>;
}

/// An established, not yet authenticated connection.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens connections to the backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, token: &SecretString) -> Result<Link, Error>;
}
