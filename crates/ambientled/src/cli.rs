//! Clap derive structures for the `ambientled` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ambientled -- control AmbientLed lights from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "ambientled",
    version,
    about = "Control AmbientLed lights from the command line",
    long_about = "Connects to the AmbientLed cloud backend over a WebSocket,\n\
        loads the account's devices and acts as a light host for them.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account to use
    #[arg(long, short = 'a', env = "AMBIENTLED_ACCOUNT", global = true)]
    pub account: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "AMBIENTLED_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend WebSocket URL (overrides the account)
    #[arg(long, short = 'u', env = "AMBIENTLED_URL", global = true)]
    pub url: Option<String>,

    /// API token (overrides keyring and config)
    #[arg(long, env = "AMBIENTLED_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorChoice,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Connect and load timeout in seconds
    #[arg(long, env = "AMBIENTLED_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the account's lights
    #[command(alias = "ls")]
    Devices,

    /// Stay connected and print state changes until interrupted
    Watch,

    /// Turn a light on, optionally setting brightness, color or effect
    On(OnArgs),

    /// Turn a light off
    Off(OffArgs),

    /// Manage CLI configuration and accounts
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct OnArgs {
    /// Device id or name
    pub device: String,

    /// Brightness in percent
    #[arg(long, short = 'b', value_parser = clap::value_parser!(u8).range(0..=100))]
    pub brightness: Option<u8>,

    /// Color as #rrggbb
    #[arg(long, short = 'r')]
    pub rgb: Option<String>,

    /// Effect name
    #[arg(long, short = 'e')]
    pub effect: Option<String>,
}

#[derive(Debug, Args)]
pub struct OffArgs {
    /// Device id or name
    pub device: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the effective configuration (tokens redacted)
    Show,

    /// Create or update an account
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Store the token in the system keyring instead of the config file
    #[arg(long)]
    pub keyring: bool,

    /// Make this account the default
    #[arg(long)]
    pub default: bool,

    /// Replace an existing account of the same name
    #[arg(long, short = 'f')]
    pub force: bool,
}
