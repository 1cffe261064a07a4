//! Shared configuration for AmbientLed tools.
//!
//! TOML accounts, token resolution (env + keyring + plaintext), and
//! translation to `ambientled_core::SessionConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use ambientled_core::{ReconnectConfig, SessionConfig, TlsVerification};

const KEYRING_SERVICE: &str = "ambientled";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no token configured for account '{account}'")]
    NoToken { account: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Account used when none is named.
    pub default_account: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend accounts.
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_account: Some("default".into()),
            defaults: Defaults::default(),
            accounts: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Name of the account to use: `requested`, else the configured
    /// default, else `"default"`.
    pub fn account_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_account.clone())
            .unwrap_or_else(|| "default".into())
    }

    /// The named account, or an empty one if it is not configured so
    /// env-only setups still work.
    pub fn account(&self, name: &str) -> Account {
        self.accounts.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Connect / auth / request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Keepalive ping interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            keepalive: default_keepalive(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_keepalive() -> u64 {
    30
}

/// A named backend account.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Account {
    /// Backend WebSocket URL. Defaults to the public backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// API token (plaintext; prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Path to a custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Give up after this many consecutive failed reconnects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Cap on the reconnect delay in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("pl", "ambientled", "ambientled").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ambientled");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config from the canonical file plus `AMBIENTLED_*` env.
///
/// Nested keys use a double underscore, e.g.
/// `AMBIENTLED_DEFAULTS__TIMEOUT=5`.
pub fn load_config() -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(config_path()))
        .merge(Env::prefixed("AMBIENTLED_").split("__"));

    Ok(figment.extract()?)
}

/// Load config from an explicit file, without env overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path));

    Ok(figment.extract()?)
}

/// Load config, returning a default if the file is missing or invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_user(account_name: &str) -> String {
    format!("{account_name}/token")
}

/// Resolve an account's token: `token_env` variable, then the system
/// keyring, then plaintext in the config.
pub fn resolve_token(account: &Account, account_name: &str) -> Result<SecretString, ConfigError> {
    resolve_token_with(
        account,
        account_name,
        |var| std::env::var(var).ok(),
        |user| {
            keyring::Entry::new(KEYRING_SERVICE, user)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

/// [`resolve_token`] with pluggable env and keyring lookups.
pub fn resolve_token_with(
    account: &Account,
    account_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Account's token_env → env var lookup
    if let Some(value) = account.token_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(value));
    }

    // 2. System keyring
    if let Some(secret) = keyring(&keyring_user(account_name)) {
        return Ok(SecretString::from(secret));
    }

    // 3. Plaintext in config
    if let Some(token) = &account.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoToken {
        account: account_name.into(),
    })
}

/// Store a token in the system keyring.
pub fn store_token(account_name: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(account_name))?;
    entry.set_password(token)?;
    tracing::debug!(account = account_name, "token stored in keyring");
    Ok(())
}

// ── Translation to SessionConfig ────────────────────────────────────

/// Parse a backend URL, accepting only `ws` and `wss`.
pub fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url: Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
        }),
    }
}

/// Build a `SessionConfig` for an account with an already resolved token.
pub fn account_to_session_config(
    account: &Account,
    defaults: &Defaults,
    token: SecretString,
) -> Result<SessionConfig, ConfigError> {
    let url = match &account.url {
        Some(raw) => parse_url(raw)?,
        None => ambientled_core::default_url(),
    };

    let tls = if account.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ca_path) = &account.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let timeout = Duration::from_secs(account.timeout.unwrap_or(defaults.timeout).max(1));

    let mut reconnect = ReconnectConfig {
        max_retries: account.max_retries,
        ..ReconnectConfig::default()
    };
    if let Some(secs) = account.max_backoff {
        reconnect.max_delay = Duration::from_secs(secs.max(1));
    }

    let mut config = SessionConfig::new(url, token);
    config.tls = tls;
    config.connect_timeout = timeout;
    config.auth_timeout = timeout;
    config.request_timeout = timeout;
    config.keepalive_interval = Duration::from_secs(defaults.keepalive.max(1));
    config.reconnect = reconnect;
    Ok(config)
}
