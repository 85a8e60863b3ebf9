//! Config subcommand handlers.

use fimpkit_config::{save_config, Config, DeviceConfig, DeviceKind};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

const REDACTED: &str = "********";

/// Starter configuration: one switch and one temperature sensor.
fn sample_config() -> Config {
    Config {
        devices: vec![
            DeviceConfig {
                kind: DeviceKind::BinarySwitch,
                address: "1".into(),
                name: None,
                units: Vec::new(),
            },
            DeviceConfig {
                kind: DeviceKind::Sensor,
                address: "2".into(),
                name: Some("sensor_temp".into()),
                units: vec!["C".into(), "F".into()],
            },
        ],
        ..Config::default()
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global);
    match args.command {
        ConfigCommand::Show => {
            let mut cfg = config::resolve(global)?;
            if cfg.mqtt.password.is_some() {
                cfg.mqtt.password = Some(REDACTED.into());
            }
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&sample_config(), &path).map_err(|e| CliError::from_config(e, &path))?;
            eprintln!("Wrote configuration to {}", path.display());
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_is_valid() {
        let cfg = sample_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.devices.len(), 2);
    }
}
