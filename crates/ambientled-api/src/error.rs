use thiserror::Error;

/// Top-level error type for the `ambientled-api` crate.
///
/// Covers every failure mode of the wire layer: connection setup, TLS,
/// authentication, framing and backend-reported errors.
/// `ambientled-core` maps these into session-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Token rejected (invalid, expired or revoked). Never retried automatically.
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// No auth result arrived within the handshake window.
    #[error("Authentication timed out after {timeout_secs}s")]
    AuthTimeout { timeout_secs: u64 },

    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed (DNS, refused, reset, bad handshake).
    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// An operation did not complete in time.
    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The peer closed the connection.
    #[error("WebSocket closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// A send was attempted on a link that is not connected.
    #[error("Not connected")]
    NotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// A frame could not be encoded or violated the expected envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Backend ─────────────────────────────────────────────────────
    /// The backend answered a request with `status: false`.
    #[error("Request rejected by backend: {message}")]
    Rejected { message: String },
}

impl Error {
    /// Returns `true` if the token was refused and the user has to act.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    /// Returns `true` if this is a transient error worth reconnecting for.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Tls(_)
                | Self::AuthTimeout { .. }
                | Self::Timeout { .. }
                | Self::Closed { .. }
                | Self::NotConnected
        )
    }
}
