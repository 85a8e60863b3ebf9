//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the configured level. With a log file configured,
//! lines go through a non-blocking appender whose guard must live until
//! the process exits.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fimpkit_config::LogSection;

use crate::error::CliError;

pub fn init(log: &LogSection) -> Result<Option<WorkerGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let json = log.format == "json";

    let Some(ref path) = log.file else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);
        let installed = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| CliError::Logging {
            reason: e.to_string(),
        })?;
        return Ok(None);
    };

    let file_name = path.file_name().ok_or_else(|| CliError::Logging {
        reason: format!("'{}' is not a file path", path.display()),
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CliError::Logging {
        reason: e.to_string(),
    })?;
    Ok(Some(guard))
}
