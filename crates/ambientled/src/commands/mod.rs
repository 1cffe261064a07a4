//! Command dispatch: CLI args -> session + entity bridge -> output.

pub mod config_cmd;
pub mod devices;
pub mod power;
pub mod watch;

use std::sync::Arc;

use secrecy::SecretString;

use ambientled_config::Config;
use ambientled_core::{EntityBridge, Session};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::host::ConsoleHost;
use crate::output;

/// Dispatch a session-bound command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices => devices::handle(global).await,
        Command::Watch => watch::handle(global).await,
        Command::On(args) => power::turn_on(args, global).await,
        Command::Off(args) => power::turn_off(args, global).await,
        // Handled before dispatch
        Command::Config(_) => Err(CliError::Internal("config is not session-bound".into())),
    }
}

/// Load the config file named by `--config`, or the canonical one.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    match &global.config {
        Some(path) => Ok(ambientled_config::load_config_from(path)?),
        None => Ok(ambientled_config::load_config_or_default()),
    }
}

/// A ready bridge and whether output may be colored.
pub struct Connected {
    pub bridge: EntityBridge,
    pub color: bool,
}

/// Resolve the account, open a session and wait for the device list.
///
/// With `echo` the console host prints every entity event.
pub async fn connect(global: &GlobalOpts, echo: bool) -> Result<Connected, CliError> {
    let cfg = load_config(global)?;
    let name = cfg.account_name(global.account.as_deref());
    let mut account = cfg.account(&name);

    if let Some(url) = &global.url {
        account.url = Some(url.clone());
    }
    if global.insecure {
        account.insecure = Some(true);
    }
    if let Some(secs) = global.timeout {
        account.timeout = Some(secs);
    }

    let token = match &global.token {
        Some(token) => SecretString::from(token.clone()),
        None => ambientled_config::resolve_token(&account, &name)?,
    };
    let session_config =
        ambientled_config::account_to_session_config(&account, &cfg.defaults, token)?;
    let ready_timeout = session_config.connect_timeout
        + session_config.auth_timeout
        + session_config.request_timeout;

    let session = Session::new(session_config)?;
    let color = output::should_color(global.color);
    let host = Arc::new(ConsoleHost::new(echo, color));
    let bridge = EntityBridge::setup(session, host).await;

    if let Err(e) = bridge.session().wait_for_ready(ready_timeout).await {
        bridge.unload().await;
        return Err(match e {
            ambientled_core::CoreError::AuthFailed { message } => CliError::AuthFailed {
                account: name,
                message,
            },
            other => other.into(),
        });
    }

    tracing::info!(account = %name, devices = bridge.session().registry().len(), "ready");
    Ok(Connected { bridge, color })
}
