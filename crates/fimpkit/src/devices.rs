//! Virtual devices: in-memory controllers behind the core service
//! families, one thing per configured device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use fimpkit_api::Publisher;
use fimpkit_config::{Config, DeviceConfig, DeviceKind};
use fimpkit_core::services::mediaplayer::{self, MediaPlayer, MediaPlayerController};
use fimpkit_core::services::numericsensor::{self, NumericSensor, NumericSensorController};
use fimpkit_core::services::outbinswitch::{self, BinarySwitch, BinarySwitchController};
use fimpkit_core::services::outlvlswitch::{self, LevelSwitch, LevelSwitchController};
use fimpkit_core::services::thermostat::{self, Setpoint, Thermostat, ThermostatController};
use fimpkit_core::{
    Adapter, ControllerError, CoreError, Refresher, ReportingStrategy, Resetter, Routing, Service,
    ServiceBase, Task, Thing,
};

const THERMOSTAT_MODES: [&str; 4] = ["off", "heat", "cool", "auto"];
const THERMOSTAT_SETPOINTS: [&str; 2] = ["heat", "cool"];
const THERMOSTAT_STATES: [&str; 3] = ["idle", "heat", "cool"];
const PLAYBACK_ACTIONS: [&str; 4] = ["play", "pause", "stop", "next_track"];
const SENSOR_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

fn guard<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State a factory reset returns to its initial value.
#[async_trait]
trait VirtualState: Send + Sync {
    async fn clear(&self);
}

// ── Binary switch ────────────────────────────────────────────────────

#[derive(Default)]
struct VirtualSwitch {
    on: Mutex<bool>,
}

#[async_trait]
impl BinarySwitchController for VirtualSwitch {
    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError> {
        *guard(&self.on) = on;
        Ok(())
    }

    async fn binary_state_report(&self) -> Result<bool, ControllerError> {
        Ok(*guard(&self.on))
    }
}

#[async_trait]
impl VirtualState for VirtualSwitch {
    async fn clear(&self) {
        *guard(&self.on) = false;
    }
}

// ── Level switch ─────────────────────────────────────────────────────

struct DimmerState {
    level: i64,
    on: bool,
}

struct VirtualDimmer {
    state: Mutex<DimmerState>,
}

impl VirtualDimmer {
    fn new() -> Self {
        Self {
            state: Mutex::new(DimmerState { level: 0, on: false }),
        }
    }
}

#[async_trait]
impl LevelSwitchController for VirtualDimmer {
    async fn set_level(&self, level: i64, duration: Option<Duration>) -> Result<(), ControllerError> {
        debug!(level, duration_secs = duration.map(|d| d.as_secs()), "dimmer level set");
        let mut state = guard(&self.state);
        state.level = level;
        state.on = level > 0;
        Ok(())
    }

    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError> {
        let mut state = guard(&self.state);
        state.on = on;
        if on && state.level == 0 {
            state.level = 100;
        }
        Ok(())
    }

    async fn level_report(&self) -> Result<i64, ControllerError> {
        let state = guard(&self.state);
        Ok(if state.on { state.level } else { 0 })
    }

    async fn binary_state_report(&self) -> Result<bool, ControllerError> {
        Ok(guard(&self.state).on)
    }
}

#[async_trait]
impl VirtualState for VirtualDimmer {
    async fn clear(&self) {
        *guard(&self.state) = DimmerState { level: 0, on: false };
    }
}

// ── Thermostat ───────────────────────────────────────────────────────

struct ThermostatState {
    mode: String,
    setpoints: HashMap<String, Setpoint>,
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self {
            mode: "off".into(),
            setpoints: HashMap::from([
                ("heat".to_owned(), Setpoint::new(21.0, "C")),
                ("cool".to_owned(), Setpoint::new(24.0, "C")),
            ]),
        }
    }
}

#[derive(Default)]
struct VirtualThermostat {
    state: Mutex<ThermostatState>,
}

#[async_trait]
impl ThermostatController for VirtualThermostat {
    async fn set_mode(&self, mode: &str) -> Result<(), ControllerError> {
        guard(&self.state).mode = mode.to_owned();
        Ok(())
    }

    async fn set_setpoint(&self, setpoint_type: &str, setpoint: Setpoint) -> Result<(), ControllerError> {
        guard(&self.state)
            .setpoints
            .insert(setpoint_type.to_owned(), setpoint);
        Ok(())
    }

    async fn mode_report(&self) -> Result<String, ControllerError> {
        Ok(guard(&self.state).mode.clone())
    }

    async fn setpoint_report(&self, setpoint_type: &str) -> Result<Setpoint, ControllerError> {
        guard(&self.state)
            .setpoints
            .get(setpoint_type)
            .cloned()
            .ok_or_else(|| format!("no {setpoint_type} setpoint").into())
    }

    async fn state_report(&self) -> Result<String, ControllerError> {
        let state = match guard(&self.state).mode.as_str() {
            "heat" => "heat",
            "cool" => "cool",
            _ => "idle",
        };
        Ok(state.to_owned())
    }
}

#[async_trait]
impl VirtualState for VirtualThermostat {
    async fn clear(&self) {
        *guard(&self.state) = ThermostatState::default();
    }
}

// ── Media player ─────────────────────────────────────────────────────

struct PlayerState {
    playback: String,
    volume: i64,
    mute: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playback: "stop".into(),
            volume: 20,
            mute: false,
        }
    }
}

#[derive(Default)]
struct VirtualPlayer {
    state: Mutex<PlayerState>,
}

#[async_trait]
impl MediaPlayerController for VirtualPlayer {
    async fn set_playback(&self, action: &str) -> Result<(), ControllerError> {
        // Track skipping keeps playing.
        let playback = if action == "next_track" { "play" } else { action };
        guard(&self.state).playback = playback.to_owned();
        Ok(())
    }

    async fn set_volume(&self, volume: i64) -> Result<(), ControllerError> {
        guard(&self.state).volume = volume;
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> Result<(), ControllerError> {
        guard(&self.state).mute = mute;
        Ok(())
    }

    async fn playback_report(&self) -> Result<String, ControllerError> {
        Ok(guard(&self.state).playback.clone())
    }

    async fn volume_report(&self) -> Result<i64, ControllerError> {
        Ok(guard(&self.state).volume)
    }

    async fn mute_report(&self) -> Result<bool, ControllerError> {
        Ok(guard(&self.state).mute)
    }
}

#[async_trait]
impl VirtualState for VirtualPlayer {
    async fn clear(&self) {
        *guard(&self.state) = PlayerState::default();
    }
}

// ── Numeric sensor ───────────────────────────────────────────────────

/// Simulated probe sampled through a [`Refresher`], so report bursts
/// (one per unit, or a get_report storm) read the probe once per interval.
struct VirtualSensor {
    initial: f64,
    probe: Arc<Mutex<f64>>,
    reading: Refresher<f64>,
}

impl VirtualSensor {
    fn new(initial: f64, sample_interval: Duration) -> Self {
        let probe = Arc::new(Mutex::new(initial));
        let source = Arc::clone(&probe);
        let reading = Refresher::new(
            move || {
                let source = Arc::clone(&source);
                async move { Ok::<_, CoreError>(*guard(&source)) }
            },
            sample_interval,
        )
        .with_failure_backoff(3, SENSOR_BACKOFF.to_vec());
        Self {
            initial,
            probe,
            reading,
        }
    }
}

/// The probe measures in the first configured unit; `F` and `C` convert.
fn convert(value: f64, from: &str, to: &str) -> f64 {
    match (from, to) {
        ("C", "F") => value * 9.0 / 5.0 + 32.0,
        ("F", "C") => (value - 32.0) * 5.0 / 9.0,
        _ => value,
    }
}

struct SensorController {
    sensor: Arc<VirtualSensor>,
    base_unit: String,
}

#[async_trait]
impl NumericSensorController for SensorController {
    async fn sensor_report(&self, unit: &str) -> Result<f64, ControllerError> {
        let value = self.sensor.reading.refresh().await?;
        Ok(convert(value, &self.base_unit, unit))
    }
}

#[async_trait]
impl VirtualState for VirtualSensor {
    async fn clear(&self) {
        *guard(&self.probe) = self.initial;
        self.reading.reset().await;
    }
}

// ── Virtual adapter ──────────────────────────────────────────────────

/// Adapter hosting every configured virtual device.
pub struct VirtualAdapter {
    adapter: Arc<Adapter>,
    kinds: Vec<DeviceKind>,
    states: Vec<Arc<dyn VirtualState>>,
    devices: Vec<DeviceConfig>,
}

impl VirtualAdapter {
    pub fn new(config: &Config, publisher: &Arc<dyn Publisher>, strategy: ReportingStrategy) -> Self {
        let adapter = Arc::new(Adapter::new(&config.adapter.name, &config.adapter.address));
        let mut kinds = Vec::new();
        let mut states: Vec<Arc<dyn VirtualState>> = Vec::new();
        let sample_interval = config.adapter.report_interval();

        for device in &config.devices {
            let name = adapter.name();
            let address = device.address.as_str();
            let base = |spec| ServiceBase::new(spec, Arc::clone(publisher)).with_reporting_strategy(strategy);

            let service: Arc<dyn Service> = match device.kind {
                DeviceKind::BinarySwitch => {
                    let controller = Arc::new(VirtualSwitch::default());
                    states.push(controller.clone());
                    Arc::new(BinarySwitch::new(
                        base(BinarySwitch::specification(name, address, address)),
                        controller,
                    ))
                }
                DeviceKind::LevelSwitch => {
                    let controller = Arc::new(VirtualDimmer::new());
                    states.push(controller.clone());
                    Arc::new(LevelSwitch::new(
                        base(LevelSwitch::specification(name, address, address, 0, 100)),
                        controller,
                    ))
                }
                DeviceKind::Thermostat => {
                    let controller = Arc::new(VirtualThermostat::default());
                    states.push(controller.clone());
                    Arc::new(Thermostat::new(
                        base(Thermostat::specification(
                            name,
                            address,
                            address,
                            &THERMOSTAT_MODES,
                            &THERMOSTAT_SETPOINTS,
                            &THERMOSTAT_STATES,
                        )),
                        controller,
                    ))
                }
                DeviceKind::MediaPlayer => {
                    let controller = Arc::new(VirtualPlayer::default());
                    states.push(controller.clone());
                    Arc::new(MediaPlayer::new(
                        base(MediaPlayer::specification(name, address, address, &PLAYBACK_ACTIONS)),
                        controller,
                    ))
                }
                DeviceKind::Sensor => {
                    let units: Vec<&str> = device.units.iter().map(String::as_str).collect();
                    let service_name = device.name.as_deref().unwrap_or("sensor_temp");
                    let sensor = Arc::new(VirtualSensor::new(21.0, sample_interval));
                    states.push(sensor.clone());
                    Arc::new(NumericSensor::new(
                        base(NumericSensor::specification(name, address, service_name, address, &units)),
                        Arc::new(SensorController {
                            sensor,
                            base_unit: units.first().copied().unwrap_or("C").to_owned(),
                        }),
                    ))
                }
            };

            if !kinds.contains(&device.kind) {
                kinds.push(device.kind);
            }
            adapter.register_thing(Thing::new(address, vec![service]));
        }

        Self {
            adapter,
            kinds,
            states,
            devices: config.devices.clone(),
        }
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    /// Command routings for every hosted device family.
    pub fn routings(&self) -> Vec<Routing> {
        self.kinds
            .iter()
            .flat_map(|kind| match kind {
                DeviceKind::BinarySwitch => outbinswitch::routings(&self.adapter),
                DeviceKind::LevelSwitch => outlvlswitch::routings(&self.adapter),
                DeviceKind::Thermostat => thermostat::routings(&self.adapter),
                DeviceKind::MediaPlayer => mediaplayer::routings(&self.adapter),
                DeviceKind::Sensor => numericsensor::routings(&self.adapter),
            })
            .collect()
    }

    /// Periodic state reports for every hosted device family.
    pub fn report_tasks(&self, interval: Duration) -> Vec<Task> {
        self.kinds
            .iter()
            .map(|kind| match kind {
                DeviceKind::BinarySwitch => outbinswitch::report_task(&self.adapter, interval),
                DeviceKind::LevelSwitch => outlvlswitch::report_task(&self.adapter, interval),
                DeviceKind::Thermostat => thermostat::report_task(&self.adapter, interval),
                DeviceKind::MediaPlayer => mediaplayer::report_task(&self.adapter, interval),
                DeviceKind::Sensor => numericsensor::report_task(&self.adapter, interval),
            })
            .collect()
    }

    /// Body of `evt.config.extended_report`.
    pub fn extended_report(&self) -> serde_json::Value {
        json!({
            "adapter": self.adapter.name(),
            "address": self.adapter.address(),
            "initialized": self.adapter.is_initialized(),
            "devices": self.devices,
        })
    }
}

#[async_trait]
impl Resetter for VirtualAdapter {
    async fn reset(&self) -> Result<(), CoreError> {
        for state in &self.states {
            state.clear().await;
        }
        self.adapter.set_initialized(false);
        self.adapter.clear();
        info!(adapter = %self.adapter.name(), devices = self.states.len(), "virtual devices reset");
        Ok(())
    }
}
