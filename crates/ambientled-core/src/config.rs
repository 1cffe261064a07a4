// ── Runtime session configuration ──
//
// Describes *how* to reach the backend for one account. Carries the token
// and connection tuning but never touches disk; ambientled-config builds
// a `SessionConfig` from profiles and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use ambientled_api::{ReconnectConfig, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled web PKI roots (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one account's session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend WebSocket URL (e.g., `wss://ambientled.pl`).
    pub url: Url,
    /// Per-user API token.
    pub token: SecretString,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Upper bound on opening the WebSocket.
    pub connect_timeout: Duration,
    /// How long to wait for the auth result frame.
    pub auth_timeout: Duration,
    /// How long to wait for the device list after connecting.
    pub request_timeout: Duration,
    /// How long a submitted command may wait for the writer.
    pub command_timeout: Duration,
    /// Interval between keepalive pings while connected.
    pub keepalive_interval: Duration,
    /// Upper bound on sending the close frame during teardown.
    pub close_timeout: Duration,
    /// Backoff policy for reconnects.
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            tls: TlsVerification::default(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Build a [`TransportConfig`] for the WebSocket connector.
    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            connect_timeout: self.connect_timeout,
            ..TransportConfig::default()
        }
    }
}

/// The default backend URL.
pub fn default_url() -> Url {
    Url::parse(ambientled_api::DEFAULT_URL).expect("DEFAULT_URL is a valid URL")
}
