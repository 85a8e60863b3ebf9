//! CLI configuration: thin wrapper around `fimpkit_config`.
//!
//! Resolves the config path from `--config` / `--workdir` and layers the
//! global flag overrides on top of the file + environment values.

use std::path::PathBuf;

use fimpkit_config::{load_config_from, resolve_config_path, Config};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file path selected by the global flags.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    resolve_config_path(global.config.as_deref(), global.workdir.as_deref())
}

/// Load file + environment, apply flag overrides, and re-validate.
pub fn resolve(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    let mut config = load_config_from(&path).map_err(|e| CliError::from_config(e, &path))?;
    apply_overrides(&mut config, global);
    config
        .validate()
        .map_err(|e| CliError::from_config(e, &path))?;
    Ok(config)
}

/// CLI flags take priority over file and environment values.
pub fn apply_overrides(config: &mut Config, global: &GlobalOpts) {
    if let Some(ref uri) = global.mqtt_uri {
        config.mqtt.uri.clone_from(uri);
    }
    if let Some(ref username) = global.mqtt_username {
        config.mqtt.username = Some(username.clone());
    }
    if let Some(ref password) = global.mqtt_password {
        config.mqtt.password = Some(password.clone());
    }
    if let Some(ref prefix) = global.mqtt_client_id_prefix {
        config.mqtt.client_id_prefix.clone_from(prefix);
    }
    if let Some(ref file) = global.log_file {
        config.log.file = Some(file.clone());
    }
    if let Some(level) = global.log_level {
        config.log.level = level.as_str().to_owned();
    }
    if let Some(format) = global.log_format {
        config.log.format = format.as_str().to_owned();
    }
}
