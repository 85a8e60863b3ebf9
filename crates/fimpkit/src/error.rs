//! CLI error types with miette diagnostics.
//!
//! Maps config and core failures into user-facing errors with help text
//! and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use fimpkit_config::ConfigError;
use fimpkit_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const STARTUP: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {field}: {reason}")]
    #[diagnostic(
        code(fimpkit::config_invalid),
        help(
            "Fix the value in {path} or the matching FIMPKIT_ environment variable.\n\
             Show the resolved configuration with: fimpkit config show"
        )
    )]
    InvalidConfig {
        field: String,
        reason: String,
        path: String,
    },

    #[error("Failed to load configuration from {path}")]
    #[diagnostic(
        code(fimpkit::config_load),
        help("Check the TOML syntax, or recreate the file with: fimpkit config init --force")
    )]
    ConfigLoad {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(fimpkit::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Adapter failed to start")]
    #[diagnostic(
        code(fimpkit::startup),
        help(
            "Check that the MQTT broker at {uri} is reachable and the credentials are valid.\n\
             Try: fimpkit run --dry-run"
        )
    )]
    Startup {
        uri: String,
        #[source]
        source: CoreError,
    },

    #[error(transparent)]
    #[diagnostic(code(fimpkit::core))]
    Core(#[from] CoreError),

    #[error("Logging setup failed: {reason}")]
    #[diagnostic(code(fimpkit::logging))]
    Logging { reason: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render configuration: {0}")]
    #[diagnostic(code(fimpkit::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig { .. } | Self::ConfigLoad { .. } | Self::ConfigExists { .. } => {
                exit_code::CONFIG
            }
            Self::Startup { .. } => exit_code::STARTUP,
            _ => exit_code::GENERAL,
        }
    }

    /// Wrap a config failure, surfacing field validation separately.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::Validation { field, reason } => Self::InvalidConfig {
                field,
                reason,
                path,
            },
            source => Self::ConfigLoad { path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_failures_exit_with_config_code() {
        let err = CliError::from_config(
            ConfigError::Validation {
                field: "mqtt.uri".into(),
                reason: "bad scheme".into(),
            },
            std::path::Path::new("/tmp/config.toml"),
        );
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: mqtt.uri: bad scheme"
        );
    }

    #[test]
    fn startup_failures_exit_with_startup_code() {
        let err = CliError::Startup {
            uri: "tcp://localhost:1883".into(),
            source: CoreError::NotRunning { component: "app" },
        };
        assert_eq!(err.exit_code(), exit_code::STARTUP);
        assert_eq!(CliError::from(CoreError::NotRunning { component: "app" }).exit_code(), exit_code::GENERAL);
    }
}
