//! `config path|show|init`: no session needed.

use std::path::PathBuf;

use ambientled_config::{Account, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, InitArgs};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&target_path(global).display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => show(global),
        ConfigCommand::Init(init_args) => init(&init_args, global),
    }
}

fn target_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(ambientled_config::config_path)
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = super::load_config(global)?;
    redact(&mut cfg);
    let rendered = toml::to_string_pretty(&cfg)?;
    output::print_output(rendered.trim_end(), global.quiet);
    Ok(())
}

fn redact(cfg: &mut Config) {
    for account in cfg.accounts.values_mut() {
        if account.token.is_some() {
            account.token = Some("********".into());
        }
    }
}

fn init(args: &InitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = target_path(global);
    let mut cfg = ambientled_config::load_config_from(&path)?;
    let name = global.account.clone().unwrap_or_else(|| "default".into());

    if cfg.accounts.contains_key(&name) && !args.force {
        return Err(CliError::AccountExists { name });
    }

    let token = global.token.clone().ok_or_else(|| CliError::Validation {
        field: "token".into(),
        reason: "pass --token or set AMBIENTLED_TOKEN".into(),
    })?;

    let url = match &global.url {
        Some(raw) => Some(ambientled_config::parse_url(raw)?.to_string()),
        None => None,
    };

    let mut account = Account {
        url,
        insecure: global.insecure.then_some(true),
        timeout: global.timeout,
        ..Account::default()
    };
    if args.keyring {
        ambientled_config::store_token(&name, &token)?;
    } else {
        account.token = Some(token);
    }

    if args.default || cfg.accounts.is_empty() {
        cfg.default_account = Some(name.clone());
    }
    cfg.accounts.insert(name.clone(), account);
    ambientled_config::save_config_to(&cfg, &path)?;

    tracing::info!(account = %name, path = %path.display(), "account saved");
    output::print_output(
        &format!("Saved account '{name}' to {}", path.display()),
        global.quiet,
    );
    Ok(())
}
