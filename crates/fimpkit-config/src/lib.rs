//! Configuration for fimpkit adapters.
//!
//! A TOML file merged over serialized defaults and under `FIMPKIT_`
//! environment variables (`__` separates nested keys), validated, and
//! translated into the runtime configs of `fimpkit-api` and
//! `fimpkit-core`. The binary layers CLI flag overrides on top.

use std::collections::HashSet;
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

use fimpkit_api::MqttConfig;
use fimpkit_core::{ReportingStrategy, RouterConfig};

pub const ENV_PREFIX: &str = "FIMPKIT_";
pub const CONFIG_FILE: &str = "config.toml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub log: LogSection,

    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub adapter: AdapterSection,

    #[serde(default)]
    pub observer: ObserverSection,

    /// Devices hosted by the virtual adapter.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MqttSection {
    /// Broker URI, `tcp://host:port` or `mqtt://host:port`.
    #[serde(default = "default_mqtt_uri")]
    pub uri: String,

    pub username: Option<String>,

    /// Plaintext; prefer `FIMPKIT_MQTT__PASSWORD`.
    pub password: Option<String>,

    /// Client ids are `<prefix>-<adapter name>-<adapter address>`.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            uri: default_mqtt_uri(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_mqtt_uri() -> String {
    "tcp://localhost:1883".into()
}
fn default_client_id_prefix() -> String {
    "fimpkit".into()
}
fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogSection {
    /// `trace`, `debug`, `info`, `warn` or `error`. `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,

    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouterSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_buffer")]
    pub buffer: usize,

    #[serde(default)]
    pub preserve_global_prefix: bool,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buffer: default_buffer(),
            preserve_global_prefix: false,
        }
    }
}

fn default_workers() -> usize {
    5
}
fn default_buffer() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AdapterSection {
    /// Resource name on the bus (`rn:`).
    #[serde(default = "default_adapter_name")]
    pub name: String,

    /// Resource address on the bus (`ad:`).
    #[serde(default = "default_adapter_address")]
    pub address: String,

    /// Period of the state report tasks.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// `always`, `on_change` or `at_least_every`.
    #[serde(default = "default_reporting")]
    pub reporting: String,

    /// Upper bound between reports for `at_least_every`.
    #[serde(default)]
    pub reporting_interval_secs: u64,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            name: default_adapter_name(),
            address: default_adapter_address(),
            report_interval_secs: default_report_interval(),
            reporting: default_reporting(),
            reporting_interval_secs: 0,
        }
    }
}

fn default_adapter_name() -> String {
    "virtual".into()
}
fn default_adapter_address() -> String {
    "1".into()
}
fn default_report_interval() -> u64 {
    60
}
fn default_reporting() -> String {
    "on_change".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObserverSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    3600
}
fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    BinarySwitch,
    LevelSwitch,
    Thermostat,
    MediaPlayer,
    Sensor,
}

/// One virtual device; becomes a thing with a single service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,

    /// Thing inclusion address, unique per adapter.
    pub address: String,

    /// Service name for sensors (`sensor_temp`, `sensor_humid`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Supported units for sensors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "fimpkit", "fimpkit").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push(CONFIG_FILE);
            p
        },
        |dirs| dirs.config_dir().join(CONFIG_FILE),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fimpkit");
    p
}

/// `explicit` wins, then `<workdir>/config.toml`, then [`config_path`].
pub fn resolve_config_path(explicit: Option<&Path>, workdir: Option<&Path>) -> PathBuf {
    match (explicit, workdir) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(dir)) => dir.join(CONFIG_FILE),
        (None, None) => config_path(),
    }
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate the config at `path` merged with the environment.
/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load from the canonical config path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uri = url::Url::parse(&self.mqtt.uri)
            .map_err(|e| invalid("mqtt.uri", format!("'{}': {e}", self.mqtt.uri)))?;
        if !matches!(uri.scheme(), "tcp" | "mqtt") {
            return Err(invalid(
                "mqtt.uri",
                format!("expected 'tcp' or 'mqtt' scheme, got '{}'", uri.scheme()),
            ));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(invalid("mqtt.keep_alive_secs", "must be at least 1"));
        }

        if !matches!(
            self.log.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(invalid(
                "log.level",
                format!(
                    "expected 'trace', 'debug', 'info', 'warn' or 'error', got '{}'",
                    self.log.level
                ),
            ));
        }
        if !matches!(self.log.format.as_str(), "text" | "json") {
            return Err(invalid(
                "log.format",
                format!("expected 'text' or 'json', got '{}'", self.log.format),
            ));
        }

        if self.router.workers == 0 {
            return Err(invalid("router.workers", "must be at least 1"));
        }
        if self.router.buffer == 0 {
            return Err(invalid("router.buffer", "must be at least 1"));
        }

        if self.adapter.name.is_empty() {
            return Err(invalid("adapter.name", "must not be empty"));
        }
        if self.adapter.address.is_empty() {
            return Err(invalid("adapter.address", "must not be empty"));
        }
        reporting_strategy(&self.adapter)?;

        if self.observer.enabled && self.observer.refresh_interval_secs == 0 {
            return Err(invalid("observer.refresh_interval_secs", "must be at least 1"));
        }

        let mut addresses = HashSet::new();
        for device in &self.devices {
            if !addresses.insert(device.address.as_str()) {
                return Err(invalid(
                    "devices.address",
                    format!("'{}' is used by more than one device", device.address),
                ));
            }
            if device.kind == DeviceKind::Sensor {
                let name_ok = device
                    .name
                    .as_deref()
                    .is_some_and(|n| n.starts_with("sensor_") && n.len() > "sensor_".len());
                if !name_ok {
                    return Err(invalid(
                        "devices.name",
                        format!("sensor at '{}' needs a name like 'sensor_temp'", device.address),
                    ));
                }
                if device.units.is_empty() {
                    return Err(invalid(
                        "devices.units",
                        format!("sensor at '{}' needs at least one unit", device.address),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ── Translation to runtime configs ──────────────────────────────────

/// Transport config for this adapter instance.
pub fn mqtt_config(cfg: &Config) -> MqttConfig {
    MqttConfig {
        uri: cfg.mqtt.uri.clone(),
        client_id: format!(
            "{}-{}-{}",
            cfg.mqtt.client_id_prefix, cfg.adapter.name, cfg.adapter.address
        ),
        username: cfg.mqtt.username.clone(),
        password: cfg.mqtt.password.clone().map(SecretString::from),
        keep_alive: Duration::from_secs(cfg.mqtt.keep_alive_secs),
        ..MqttConfig::default()
    }
}

pub fn router_config(section: &RouterSection) -> RouterConfig {
    RouterConfig::default()
        .with_workers(section.workers)
        .with_buffer(section.buffer)
        .with_preserve_global_prefix(section.preserve_global_prefix)
}

pub fn reporting_strategy(section: &AdapterSection) -> Result<ReportingStrategy, ConfigError> {
    match section.reporting.as_str() {
        "always" => Ok(ReportingStrategy::Always),
        "on_change" => Ok(ReportingStrategy::OnChange),
        "at_least_every" => {
            if section.reporting_interval_secs == 0 {
                return Err(invalid(
                    "adapter.reporting_interval_secs",
                    "required for 'at_least_every'",
                ));
            }
            Ok(ReportingStrategy::AtLeastEvery(Duration::from_secs(
                section.reporting_interval_secs,
            )))
        }
        other => Err(invalid(
            "adapter.reporting",
            format!("expected 'always', 'on_change', or 'at_least_every', got '{other}'"),
        )),
    }
}

impl AdapterSection {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl ObserverSection {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
