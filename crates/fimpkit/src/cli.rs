//! Clap derive structures for the `fimpkit` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fimpkit -- host virtual FIMP devices on an MQTT bus
#[derive(Debug, Parser)]
#[command(
    name = "fimpkit",
    version,
    about = "Host virtual FIMP devices on an MQTT bus",
    long_about = "Runs an adapter that exposes configured virtual devices (switches,\n\
        dimmers, thermostats, media players, sensors) over the FIMP protocol,\n\
        answering commands and publishing state reports.",
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
    /// Working directory; `<workdir>/config.toml` is used when --config is absent
    #[arg(long, short = 'w', env = "FIMPKIT_WORKDIR", global = true)]
    pub workdir: Option<PathBuf>,

    /// Config file path
    #[arg(long, short = 'c', env = "FIMPKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// MQTT broker URI (overrides config)
    #[arg(long, global = true)]
    pub mqtt_uri: Option<String>,

    /// MQTT username (overrides config)
    #[arg(long, global = true)]
    pub mqtt_username: Option<String>,

    /// MQTT password (overrides config)
    #[arg(long, global = true)]
    pub mqtt_password: Option<String>,

    /// MQTT client id prefix (overrides config)
    #[arg(long, global = true)]
    pub mqtt_client_id_prefix: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level (overrides config; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log line format (overrides config)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host the virtual adapter until SIGINT/SIGTERM or factory reset
    Run(RunArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Use an in-process loopback instead of the MQTT broker
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration as TOML
    Show,

    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Print the config file path in use
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
