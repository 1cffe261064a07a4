// ── Core error types ──
//
// Session-level errors from ambientled-core. Consumers never see raw
// tungstenite or JSON failures; the `From<ambientled_api::Error>` impl
// translates wire-layer errors into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Authentication timed out after {timeout_secs}s")]
    AuthTimeout { timeout_secs: u64 },

    #[error("Not connected to the backend")]
    NotConnected,

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Unknown device: {id}")]
    UnknownDevice { id: String },

    #[error("Device not found: {id}")]
    NotFound { id: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Device {device} does not support {operation}")]
    Unsupported { operation: String, device: String },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Rejected by backend: {message}")]
    Rejected { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if the user has to supply new credentials.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<ambientled_api::Error> for CoreError {
    fn from(err: ambientled_api::Error) -> Self {
        use ambientled_api::Error as Api;

        match err {
            Api::AuthFailed { message } => CoreError::AuthFailed { message },
            Api::AuthTimeout { timeout_secs } => CoreError::AuthTimeout { timeout_secs },
            Api::Connect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Closed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::InvalidUrl(msg) => CoreError::Config {
                message: format!("Invalid URL: {msg}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::NotConnected => CoreError::NotConnected,
            Api::Rejected { message } => CoreError::Rejected { message },
            Api::Protocol(msg) => CoreError::Internal(format!("Protocol error: {msg}")),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
