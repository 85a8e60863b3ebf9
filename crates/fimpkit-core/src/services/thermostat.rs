//! Thermostat (`thermostat`).
//!
//! Modes, setpoints and operating states are enumerated by the `sup_modes`,
//! `sup_setpoints` and `sup_states` properties. Setting a mode that has an
//! associated setpoint reports both the mode and that setpoint.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fimpkit_api::{Value, ValueType};
use serde_json::json;

use crate::adapter::Adapter;
use crate::error::{ControllerError, CoreError};
use crate::router::Routing;
use crate::service::{command_voters, service_routing, Service, ServiceBase, Specification};
use crate::task::Task;

use super::polling_task;

pub const THERMOSTAT: &str = "thermostat";

pub const CMD_MODE_SET: &str = "cmd.mode.set";
pub const CMD_MODE_GET_REPORT: &str = "cmd.mode.get_report";
pub const EVT_MODE_REPORT: &str = "evt.mode.report";
pub const CMD_SETPOINT_SET: &str = "cmd.setpoint.set";
pub const CMD_SETPOINT_GET_REPORT: &str = "cmd.setpoint.get_report";
pub const EVT_SETPOINT_REPORT: &str = "evt.setpoint.report";
pub const CMD_STATE_GET_REPORT: &str = "cmd.state.get_report";
pub const EVT_STATE_REPORT: &str = "evt.state.report";

pub const PROP_SUP_MODES: &str = "sup_modes";
pub const PROP_SUP_SETPOINTS: &str = "sup_setpoints";
pub const PROP_SUP_STATES: &str = "sup_states";

const SUPPORTED_UNITS: [&str; 2] = ["C", "F"];
const DEFAULT_UNIT: &str = "C";

#[derive(Debug, Clone, PartialEq)]
pub struct Setpoint {
    pub temperature: f64,
    pub unit: String,
}

impl Setpoint {
    pub fn new(temperature: f64, unit: &str) -> Self {
        Self {
            temperature,
            unit: unit.to_owned(),
        }
    }

    /// Wire form: `{"type": <mode>, "temp": "21.0", "unit": "C"}`.
    fn to_str_map(&self, setpoint_type: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_owned(), setpoint_type.to_owned()),
            ("temp".to_owned(), format!("{:.1}", self.temperature)),
            ("unit".to_owned(), self.unit.clone()),
        ])
    }
}

#[async_trait]
pub trait ThermostatController: Send + Sync {
    async fn set_mode(&self, mode: &str) -> Result<(), ControllerError>;

    async fn set_setpoint(&self, setpoint_type: &str, setpoint: Setpoint) -> Result<(), ControllerError>;

    async fn mode_report(&self) -> Result<String, ControllerError>;

    async fn setpoint_report(&self, setpoint_type: &str) -> Result<Setpoint, ControllerError>;

    async fn state_report(&self) -> Result<String, ControllerError>;
}

pub struct Thermostat {
    base: ServiceBase,
    controller: Arc<dyn ThermostatController>,
}

impl Thermostat {
    pub fn new(base: ServiceBase, controller: Arc<dyn ThermostatController>) -> Self {
        Self { base, controller }
    }

    pub fn specification(
        adapter: &str,
        thing: &str,
        service_address: &str,
        modes: &[&str],
        setpoints: &[&str],
        states: &[&str],
    ) -> Specification {
        Specification::device(adapter, thing, THERMOSTAT, service_address)
            .with_prop(PROP_SUP_MODES, json!(modes))
            .with_prop(PROP_SUP_SETPOINTS, json!(setpoints))
            .with_prop(PROP_SUP_STATES, json!(states))
            .accepts(CMD_MODE_SET, ValueType::String)
            .accepts(CMD_MODE_GET_REPORT, ValueType::Null)
            .accepts(CMD_SETPOINT_SET, ValueType::StrMap)
            .accepts(CMD_SETPOINT_GET_REPORT, ValueType::String)
            .accepts(CMD_STATE_GET_REPORT, ValueType::Null)
            .emits(EVT_MODE_REPORT, ValueType::String)
            .emits(EVT_SETPOINT_REPORT, ValueType::StrMap)
            .emits(EVT_STATE_REPORT, ValueType::String)
    }

    pub fn base(&self) -> &ServiceBase {
        &self.base
    }

    pub fn supports_setpoint(&self, setpoint_type: &str) -> bool {
        self.base
            .specification()
            .supports(PROP_SUP_SETPOINTS, setpoint_type)
    }

    pub fn setpoint_types(&self) -> Vec<String> {
        self.base.specification().prop_strings(PROP_SUP_SETPOINTS)
    }

    pub async fn set_mode(&self, mode: &str) -> Result<(), CoreError> {
        self.base.validate(PROP_SUP_MODES, "mode", mode)?;
        let _guard = self.base.lock().await;
        self.controller
            .set_mode(mode)
            .await
            .map_err(|e| self.base.controller_error("set mode", e))
    }

    pub async fn set_setpoint(&self, setpoint_type: &str, setpoint: Setpoint) -> Result<(), CoreError> {
        self.base
            .validate(PROP_SUP_SETPOINTS, "setpoint", setpoint_type)?;
        if !SUPPORTED_UNITS.contains(&setpoint.unit.as_str()) {
            return Err(CoreError::validation(
                self.name(),
                format!("unsupported unit '{}'", setpoint.unit),
            ));
        }
        let _guard = self.base.lock().await;
        self.controller
            .set_setpoint(setpoint_type, setpoint)
            .await
            .map_err(|e| self.base.controller_error("set setpoint", e))
    }

    pub async fn send_mode_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let mode = self
            .controller
            .mode_report()
            .await
            .map_err(|e| self.base.controller_error("read mode", e))?;
        self.base.validate(PROP_SUP_MODES, "mode", &mode)?;
        let report = self.base.event(EVT_MODE_REPORT, Value::String(mode));
        self.base.send_report(force, "", report).await
    }

    /// Setpoints are cached per setpoint type.
    pub async fn send_setpoint_report(&self, setpoint_type: &str, force: bool) -> Result<bool, CoreError> {
        self.base
            .validate(PROP_SUP_SETPOINTS, "setpoint", setpoint_type)?;
        let _guard = self.base.lock().await;
        let setpoint = self
            .controller
            .setpoint_report(setpoint_type)
            .await
            .map_err(|e| self.base.controller_error("read setpoint", e))?;
        let report = self.base.event(
            EVT_SETPOINT_REPORT,
            Value::StrMap(setpoint.to_str_map(setpoint_type)),
        );
        self.base.send_report(force, setpoint_type, report).await
    }

    pub async fn send_state_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let state = self
            .controller
            .state_report()
            .await
            .map_err(|e| self.base.controller_error("read state", e))?;
        self.base.validate(PROP_SUP_STATES, "state", &state)?;
        let report = self.base.event(EVT_STATE_REPORT, Value::String(state));
        self.base.send_report(force, "", report).await
    }

    pub fn has_states(&self) -> bool {
        !self
            .base
            .specification()
            .prop_strings(PROP_SUP_STATES)
            .is_empty()
    }
}

impl Service for Thermostat {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn specification(&self) -> &Specification {
        self.base.specification()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub fn routings(adapter: &Arc<Adapter>) -> Vec<Routing> {
    vec![
        service_routing(
            adapter,
            command_voters(adapter, THERMOSTAT, CMD_MODE_SET),
            |thermostat: Arc<Thermostat>, msg| async move {
                let mode = msg.payload.string_value()?;
                thermostat.set_mode(mode).await?;
                thermostat.send_mode_report(true).await?;
                if thermostat.supports_setpoint(mode) {
                    thermostat.send_setpoint_report(mode, true).await?;
                }
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, THERMOSTAT, CMD_MODE_GET_REPORT),
            |thermostat: Arc<Thermostat>, _msg| async move {
                thermostat.send_mode_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, THERMOSTAT, CMD_SETPOINT_SET),
            |thermostat: Arc<Thermostat>, msg| async move {
                let fields = msg.payload.str_map_value()?;
                let setpoint_type = fields.get("type").map(String::as_str).unwrap_or_default();
                let temperature = fields
                    .get("temp")
                    .and_then(|t| t.trim().parse::<f64>().ok())
                    .ok_or_else(|| CoreError::validation(thermostat.name(), "missing or invalid temp"))?;
                let unit = fields.get("unit").map_or(DEFAULT_UNIT, String::as_str);
                thermostat
                    .set_setpoint(setpoint_type, Setpoint::new(temperature, unit))
                    .await?;
                thermostat.send_setpoint_report(setpoint_type, true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, THERMOSTAT, CMD_SETPOINT_GET_REPORT),
            |thermostat: Arc<Thermostat>, msg| async move {
                // null asks for every supported setpoint
                let types = match &msg.payload.value {
                    Value::Null => thermostat.setpoint_types(),
                    _ => vec![msg.payload.string_value()?.to_owned()],
                };
                for setpoint_type in &types {
                    thermostat.send_setpoint_report(setpoint_type, true).await?;
                }
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, THERMOSTAT, CMD_STATE_GET_REPORT),
            |thermostat: Arc<Thermostat>, _msg| async move {
                thermostat.send_state_report(true).await?;
                Ok(None)
            },
        ),
    ]
}

pub fn report_task(adapter: &Arc<Adapter>, interval: Duration) -> Task {
    polling_task(adapter, THERMOSTAT, interval, |thermostat: Arc<Thermostat>| async move {
        thermostat.send_mode_report(false).await?;
        for setpoint_type in thermostat.setpoint_types() {
            thermostat.send_setpoint_report(&setpoint_type, false).await?;
        }
        if thermostat.has_states() {
            thermostat.send_state_report(false).await?;
        }
        Ok(())
    })
}
