//! CLI error types with miette diagnostics.
//!
//! Maps core, bridge and config errors into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ambientled_config::ConfigError;
use ambientled_core::{CoreError, ServiceCallError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the backend at {url}")]
    #[diagnostic(
        code(ambientled::connection_failed),
        help(
            "{reason}\n\
             Check the URL and your network. Self-hosted backends with\n\
             self-signed certificates need --insecure (-k) or ca_cert."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("'{device}' is unavailable")]
    #[diagnostic(
        code(ambientled::unavailable),
        help("The session is not connected. Try again once the backend is reachable.")
    )]
    Unavailable { device: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(ambientled::auth_failed),
        help(
            "The backend rejected the token for account '{account}'.\n\
             Update it with: ambientled config init --keyring --token <TOKEN>"
        )
    )]
    AuthFailed { account: String, message: String },

    #[error("No token configured for account '{account}'")]
    #[diagnostic(
        code(ambientled::no_token),
        help(
            "Configure one with: ambientled config init --token <TOKEN>\n\
             Or set the AMBIENTLED_TOKEN environment variable."
        )
    )]
    NoToken { account: String },

    // ── Devices ──────────────────────────────────────────────────────
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(ambientled::not_found),
        help("Run: ambientled devices to see available lights")
    )]
    NotFound { identifier: String },

    #[error("{message}")]
    #[diagnostic(code(ambientled::unsupported))]
    Unsupported { message: String },

    #[error("Rejected by backend: {message}")]
    #[diagnostic(code(ambientled::rejected))]
    Rejected { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ambientled::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Account '{name}' already exists")]
    #[diagnostic(
        code(ambientled::account_exists),
        help("Pass --force to replace it.")
    )]
    AccountExists { name: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(ambientled::config), help("Config file: {path}"))]
    Config { message: String, path: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(ambientled::timeout),
        help("Increase it with --timeout or check the backend's responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    #[diagnostic(code(ambientled::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Unavailable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoToken { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::AccountExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::NotConnected => CliError::ConnectionFailed {
                url: "(disconnected)".into(),
                reason: "The backend connection was lost".into(),
            },

            CoreError::AuthFailed { message } => CliError::AuthFailed {
                account: "current".into(),
                message,
            },

            CoreError::AuthTimeout { timeout_secs } | CoreError::Timeout { timeout_secs } => {
                CliError::Timeout {
                    seconds: timeout_secs,
                }
            }

            CoreError::UnknownDevice { id } | CoreError::NotFound { id } => {
                CliError::NotFound { identifier: id }
            }

            CoreError::Unsupported { operation, device } => CliError::Unsupported {
                message: format!("{device} does not support {operation}"),
            },

            CoreError::InvalidCommand { message } => CliError::Validation {
                field: "command".into(),
                reason: message,
            },

            CoreError::Rejected { message } => CliError::Rejected { message },

            CoreError::Config { message } => CliError::Config {
                message,
                path: ambientled_config::config_path().display().to_string(),
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ServiceCallError> for CliError {
    fn from(err: ServiceCallError) -> Self {
        match err {
            ServiceCallError::UnknownEntity { unique_id } => CliError::NotFound {
                identifier: unique_id,
            },
            ServiceCallError::Unavailable { unique_id } => CliError::Unavailable { device: unique_id },
            ServiceCallError::NotSupported { source, .. } | ServiceCallError::Failed { source, .. } => {
                source.into()
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoToken { account } => CliError::NoToken { account },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
                path: ambientled_config::config_path().display().to_string(),
            },
        }
    }
}
