#![allow(clippy::unwrap_used)]
// Device service families driven end to end through the router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fimpkit_api::address::MSG_TYPE_CMD;
use fimpkit_api::{Address, Envelope, MemoryTransport, Message, Transport, Value};
use fimpkit_core::router::EVT_ERROR_REPORT;
use fimpkit_core::services::mediaplayer::{MediaPlayer, MediaPlayerController};
use fimpkit_core::services::numericsensor::{NumericSensor, NumericSensorController};
use fimpkit_core::services::outbinswitch::{self, BinarySwitch, BinarySwitchController};
use fimpkit_core::services::outlvlswitch::{LevelSwitch, LevelSwitchController};
use fimpkit_core::services::thermostat::{Setpoint, Thermostat, ThermostatController};
use fimpkit_core::services::{mediaplayer, numericsensor, outlvlswitch, thermostat};
use fimpkit_core::{
    Adapter, ControllerError, ReportingStrategy, Router, RouterConfig, Service, ServiceBase,
    TaskManager, Thing,
};

// ── In-memory controllers ───────────────────────────────────────────

#[derive(Default)]
struct Switch {
    on: Mutex<bool>,
}

#[async_trait]
impl BinarySwitchController for Switch {
    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError> {
        *self.on.lock().unwrap() = on;
        Ok(())
    }

    async fn binary_state_report(&self) -> Result<bool, ControllerError> {
        Ok(*self.on.lock().unwrap())
    }
}

#[derive(Default)]
struct Dimmer {
    level: Mutex<i64>,
    on: Mutex<bool>,
}

#[async_trait]
impl LevelSwitchController for Dimmer {
    async fn set_level(&self, level: i64, _duration: Option<Duration>) -> Result<(), ControllerError> {
        *self.level.lock().unwrap() = level;
        Ok(())
    }

    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError> {
        *self.on.lock().unwrap() = on;
        Ok(())
    }

    async fn level_report(&self) -> Result<i64, ControllerError> {
        Ok(*self.level.lock().unwrap())
    }

    async fn binary_state_report(&self) -> Result<bool, ControllerError> {
        Ok(*self.on.lock().unwrap())
    }
}

struct Heater {
    mode: Mutex<String>,
    setpoints: Mutex<HashMap<String, Setpoint>>,
    calls: Mutex<Vec<String>>,
}

impl Heater {
    fn new() -> Self {
        Self {
            mode: Mutex::new("off".into()),
            setpoints: Mutex::new(HashMap::from([("heat".to_owned(), Setpoint::new(21.0, "C"))])),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ThermostatController for Heater {
    async fn set_mode(&self, mode: &str) -> Result<(), ControllerError> {
        self.calls.lock().unwrap().push(format!("set_mode({mode})"));
        *self.mode.lock().unwrap() = mode.to_owned();
        Ok(())
    }

    async fn set_setpoint(&self, setpoint_type: &str, setpoint: Setpoint) -> Result<(), ControllerError> {
        self.setpoints
            .lock()
            .unwrap()
            .insert(setpoint_type.to_owned(), setpoint);
        Ok(())
    }

    async fn mode_report(&self) -> Result<String, ControllerError> {
        Ok(self.mode.lock().unwrap().clone())
    }

    async fn setpoint_report(&self, setpoint_type: &str) -> Result<Setpoint, ControllerError> {
        self.setpoints
            .lock()
            .unwrap()
            .get(setpoint_type)
            .cloned()
            .ok_or_else(|| format!("no setpoint for {setpoint_type}").into())
    }

    async fn state_report(&self) -> Result<String, ControllerError> {
        Ok("idle".into())
    }
}

struct Speaker {
    volume: Mutex<i64>,
    playback: Mutex<String>,
}

impl Speaker {
    fn new() -> Self {
        Self {
            volume: Mutex::new(10),
            playback: Mutex::new("pause".into()),
        }
    }
}

#[async_trait]
impl MediaPlayerController for Speaker {
    async fn set_playback(&self, _action: &str) -> Result<(), ControllerError> {
        Ok(())
    }

    async fn set_volume(&self, volume: i64) -> Result<(), ControllerError> {
        *self.volume.lock().unwrap() = volume;
        Ok(())
    }

    async fn set_mute(&self, _mute: bool) -> Result<(), ControllerError> {
        Ok(())
    }

    async fn playback_report(&self) -> Result<String, ControllerError> {
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn volume_report(&self) -> Result<i64, ControllerError> {
        Ok(*self.volume.lock().unwrap())
    }

    async fn mute_report(&self) -> Result<bool, ControllerError> {
        Ok(false)
    }
}

struct Thermometer;

#[async_trait]
impl NumericSensorController for Thermometer {
    async fn sensor_report(&self, unit: &str) -> Result<f64, ControllerError> {
        Ok(if unit == "F" { 71.6 } else { 22.0 })
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    transport: Arc<MemoryTransport>,
    adapter: Arc<Adapter>,
    router: Router,
    heater: Arc<Heater>,
    switch: Arc<Switch>,
    player: Arc<MediaPlayer>,
}

async fn fixture() -> Fixture {
    let transport = Arc::new(MemoryTransport::new());
    let adapter = Arc::new(Adapter::new("test", "1"));

    let heater = Arc::new(Heater::new());
    let switch = Arc::new(Switch::default());
    let player = Arc::new(MediaPlayer::new(
        ServiceBase::new(
            MediaPlayer::specification("test", "1", "5", &["play", "pause"]),
            transport.clone(),
        ),
        Arc::new(Speaker::new()),
    ));

    let services: Vec<Arc<dyn Service>> = vec![
        Arc::new(Thermostat::new(
            ServiceBase::new(
                Thermostat::specification("test", "1", "2", &["heat", "cool", "off"], &["heat"], &["idle", "heat"]),
                transport.clone(),
            ),
            heater.clone(),
        )),
        Arc::new(BinarySwitch::new(
            ServiceBase::new(BinarySwitch::specification("test", "1", "2"), transport.clone()),
            switch.clone(),
        )),
        Arc::new(LevelSwitch::new(
            ServiceBase::new(LevelSwitch::specification("test", "1", "3", 0, 100), transport.clone()),
            Arc::new(Dimmer::default()),
        )),
        Arc::new(NumericSensor::new(
            ServiceBase::new(
                NumericSensor::specification("test", "1", "sensor_temp", "4", &["C", "F"]),
                transport.clone(),
            ),
            Arc::new(Thermometer),
        )),
        player.clone(),
    ];
    adapter.register_thing(Thing::new("1", services));
    adapter.set_initialized(true);

    let mut routings = thermostat::routings(&adapter);
    routings.extend(outbinswitch::routings(&adapter));
    routings.extend(outlvlswitch::routings(&adapter));
    routings.extend(numericsensor::routings(&adapter));
    routings.extend(mediaplayer::routings(&adapter));

    let router = Router::new(transport.clone(), "services", routings, RouterConfig::default().with_workers(1));
    transport.subscribe(&router.topics()).await.unwrap();
    router.start().await.unwrap();

    Fixture {
        transport,
        adapter,
        router,
        heater,
        switch,
        player,
    }
}

fn command(service: &str, service_address: &str) -> Address {
    Address::device(MSG_TYPE_CMD, "test", "1", service, service_address)
}

fn events(published: &[Message]) -> Vec<Message> {
    published
        .iter()
        .filter(|m| m.payload.msg_type.starts_with("evt."))
        .cloned()
        .collect()
}

// ── Thermostat ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_thermostat_set_mode_reports_mode_then_setpoint() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("thermostat", "2"),
            &Envelope::new_string("cmd.mode.set", "thermostat", "heat"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(2, WAIT).await;
    assert_eq!(f.heater.calls.lock().unwrap().as_slice(), ["set_mode(heat)"]);
    assert_eq!(published.len(), 2);

    assert_eq!(published[0].payload.msg_type, "evt.mode.report");
    assert_eq!(published[0].payload.string_value().unwrap(), "heat");
    assert_eq!(
        published[0].topic,
        "pt:j1/mt:evt/rt:dev/rn:test/ad:1/sv:thermostat/ad:2"
    );

    assert_eq!(published[1].payload.msg_type, "evt.setpoint.report");
    let setpoint = published[1].payload.str_map_value().unwrap();
    assert_eq!(setpoint["type"], "heat");
    assert_eq!(setpoint["temp"], "21.0");
    assert_eq!(setpoint["unit"], "C");

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_thermostat_rejects_unsupported_mode() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("thermostat", "2"),
            &Envelope::new_string("cmd.mode.set", "thermostat", "auto"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, EVT_ERROR_REPORT);
    assert_eq!(
        published[0].payload.string_value().unwrap(),
        "thermostat: unsupported mode 'auto'"
    );
    assert!(f.heater.calls.lock().unwrap().is_empty());

    f.router.stop().await.unwrap();
}

// ── Binary switch ───────────────────────────────────────────────────

#[tokio::test]
async fn test_binary_switch_unknown_address_reports_error_on_inbound_topic() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("out_bin_switch", "99"),
            &Envelope::new_bool("cmd.binary.set", "out_bin_switch", true),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.transport.published().len(), 1);
    assert_eq!(published[0].payload.msg_type, EVT_ERROR_REPORT);
    assert_eq!(
        published[0].topic,
        "pt:j1/mt:cmd/rt:dev/rn:test/ad:1/sv:out_bin_switch/ad:99"
    );
    assert!(published[0]
        .payload
        .string_value()
        .unwrap()
        .contains("service not found"));
    assert!(!*f.switch.on.lock().unwrap());

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_binary_switch_set_reports_new_state() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("out_bin_switch", "2"),
            &Envelope::new_bool("cmd.binary.set", "out_bin_switch", true),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, "evt.binary.report");
    assert_eq!(published[0].payload.value, Value::Bool(true));
    assert!(*f.switch.on.lock().unwrap());

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_wrong_value_type_is_reported() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("out_bin_switch", "2"),
            &Envelope::new_string("cmd.binary.set", "out_bin_switch", "on"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, EVT_ERROR_REPORT);
    assert!(published[0]
        .payload
        .string_value()
        .unwrap()
        .contains("expected bool"));

    f.router.stop().await.unwrap();
}

// ── Level switch ────────────────────────────────────────────────────

#[tokio::test]
async fn test_level_outside_range_is_rejected() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("out_lvl_switch", "3"),
            &Envelope::new_int("cmd.lvl.set", "out_lvl_switch", 150),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, EVT_ERROR_REPORT);
    assert!(published[0].payload.string_value().unwrap().contains("outside 0..=100"));

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_level_set_with_duration_reports_level() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("out_lvl_switch", "3"),
            &Envelope::new_int("cmd.lvl.set", "out_lvl_switch", 40).with_property("duration", "5"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, "evt.lvl.report");
    assert_eq!(published[0].payload.int_value().unwrap(), 40);

    f.router.stop().await.unwrap();
}

// ── Media player ────────────────────────────────────────────────────

#[tokio::test]
async fn test_volume_report_is_deduplicated_on_change() {
    let f = fixture().await;

    assert!(f.player.send_volume_report(false).await.unwrap());
    assert!(!f.player.send_volume_report(false).await.unwrap());

    let reports = f.transport.published_of_type("evt.volume.report");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].payload.value, Value::Int(10));

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_playback_is_not_reported() {
    let transport = Arc::new(MemoryTransport::new());
    let speaker = Arc::new(Speaker::new());
    let player = MediaPlayer::new(
        ServiceBase::new(
            MediaPlayer::specification("test", "1", "5", &["play", "pause"]),
            transport.clone(),
        ),
        speaker.clone(),
    );

    assert!(player.send_playback_report(false).await.unwrap());

    *speaker.playback.lock().unwrap() = "rewind".into();
    let err = player.send_playback_report(true).await.unwrap_err();
    assert_eq!(err.to_string(), "media_player: unsupported playback 'rewind'");

    let reports = transport.published_of_type("evt.playback.report");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].payload.value, Value::String("pause".into()));
}

// ── Numeric sensor ──────────────────────────────────────────────────

#[tokio::test]
async fn test_sensor_null_request_reports_every_unit() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("sensor_temp", "4"),
            &Envelope::new_null("cmd.sensor.get_report", "sensor_temp"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(2, WAIT).await;
    let reports = events(&published);
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].payload.property("unit"), Some("C"));
    assert!((reports[0].payload.float_value().unwrap() - 22.0).abs() < 1e-9);
    assert_eq!(reports[1].payload.property("unit"), Some("F"));

    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_sensor_unsupported_unit_is_rejected() {
    let f = fixture().await;

    f.transport
        .inject(
            &command("sensor_temp", "4"),
            &Envelope::new_string("cmd.sensor.get_report", "sensor_temp", "K"),
        )
        .await
        .unwrap();

    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, EVT_ERROR_REPORT);
    assert_eq!(
        published[0].payload.string_value().unwrap(),
        "sensor_temp: unsupported unit 'K'"
    );

    f.router.stop().await.unwrap();
}

// ── Periodic reports ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unchanged_value_is_reported_again_after_interval() {
    let transport = Arc::new(MemoryTransport::new());
    let switch = BinarySwitch::new(
        ServiceBase::new(BinarySwitch::specification("test", "1", "2"), transport.clone())
            .with_reporting_strategy(ReportingStrategy::AtLeastEvery(Duration::from_secs(60))),
        Arc::new(Switch::default()),
    );

    assert!(switch.send_binary_report(false).await.unwrap());
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(!switch.send_binary_report(false).await.unwrap());
    assert_eq!(transport.published_of_type("evt.binary.report").len(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(switch.send_binary_report(false).await.unwrap());
    // The interval restarts from the latest report.
    assert!(!switch.send_binary_report(false).await.unwrap());

    let reports = transport.published_of_type("evt.binary.report");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].payload.value, Value::Bool(false));
}

#[tokio::test]
async fn test_report_task_publishes_only_changes() {
    let f = fixture().await;
    let tasks = TaskManager::new(vec![outbinswitch::report_task(
        &f.adapter,
        Duration::from_millis(50),
    )]);

    tasks.start().await.unwrap();
    f.transport.wait_published(1, WAIT).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(f.transport.published_of_type("evt.binary.report").len(), 1);

    *f.switch.on.lock().unwrap() = true;
    f.transport.wait_published(2, WAIT).await;
    let reports = f.transport.published_of_type("evt.binary.report");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].payload.value, Value::Bool(true));

    tasks.stop().await.unwrap();
    f.router.stop().await.unwrap();
}

#[tokio::test]
async fn test_report_task_waits_for_initialization() {
    let f = fixture().await;
    f.adapter.set_initialized(false);
    let tasks = TaskManager::new(vec![outbinswitch::report_task(
        &f.adapter,
        Duration::from_millis(20),
    )]);

    tasks.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(f.transport.published().is_empty());

    f.adapter.set_initialized(true);
    let published = f.transport.wait_published(1, WAIT).await;
    assert_eq!(published[0].payload.msg_type, "evt.binary.report");

    tasks.stop().await.unwrap();
    f.router.stop().await.unwrap();
}
