//! Numeric sensors (`sensor_temp`, `sensor_lumin`, ...).
//!
//! One service per measured quantity. Readings are reported per unit and
//! cached per unit, so a change in one unit does not suppress another.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fimpkit_api::{Envelope, Value, ValueType};
use serde_json::json;

use crate::adapter::Adapter;
use crate::error::{ControllerError, CoreError};
use crate::router::Routing;
use crate::service::{service_routing, Service, ServiceBase, Specification};
use crate::task::Task;
use crate::voter::MessageVoter;

use super::polling_task;

pub const SENSOR_PREFIX: &str = "sensor_";

pub const CMD_SENSOR_GET_REPORT: &str = "cmd.sensor.get_report";
pub const EVT_SENSOR_REPORT: &str = "evt.sensor.report";

pub const PROP_SUP_UNITS: &str = "sup_units";
pub const PROP_UNIT: &str = "unit";

#[async_trait]
pub trait NumericSensorController: Send + Sync {
    async fn sensor_report(&self, unit: &str) -> Result<f64, ControllerError>;
}

pub struct NumericSensor {
    base: ServiceBase,
    controller: Arc<dyn NumericSensorController>,
}

impl NumericSensor {
    pub fn new(base: ServiceBase, controller: Arc<dyn NumericSensorController>) -> Self {
        Self { base, controller }
    }

    /// `name` must carry the `sensor_` prefix, e.g. `sensor_temp`.
    pub fn specification(adapter: &str, thing: &str, name: &str, service_address: &str, units: &[&str]) -> Specification {
        Specification::device(adapter, thing, name, service_address)
            .with_prop(PROP_SUP_UNITS, json!(units))
            .accepts(CMD_SENSOR_GET_REPORT, ValueType::String)
            .emits(EVT_SENSOR_REPORT, ValueType::Float)
    }

    pub fn base(&self) -> &ServiceBase {
        &self.base
    }

    pub fn units(&self) -> Vec<String> {
        self.base.specification().prop_strings(PROP_SUP_UNITS)
    }

    pub async fn send_sensor_report(&self, unit: &str, force: bool) -> Result<bool, CoreError> {
        self.base.validate(PROP_SUP_UNITS, "unit", unit)?;
        let _guard = self.base.lock().await;
        let reading = self
            .controller
            .sensor_report(unit)
            .await
            .map_err(|e| self.base.controller_error("read sensor", e))?;
        let report = Envelope::new(EVT_SENSOR_REPORT, self.name(), Value::Float(reading))
            .with_property(PROP_UNIT, unit);
        self.base.send_report(force, unit, report).await
    }
}

impl Service for NumericSensor {
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
    vec![service_routing(
        adapter,
        vec![
            MessageVoter::topic(&adapter.command_pattern("")),
            MessageVoter::service_prefix(SENSOR_PREFIX),
            MessageVoter::message_type(CMD_SENSOR_GET_REPORT),
        ],
        |sensor: Arc<NumericSensor>, msg| async move {
            // null asks for every supported unit
            let units = match &msg.payload.value {
                Value::Null => sensor.units(),
                _ => vec![msg.payload.string_value()?.to_owned()],
            };
            for unit in &units {
                sensor.send_sensor_report(unit, true).await?;
            }
            Ok(None)
        },
    )]
}

pub fn report_task(adapter: &Arc<Adapter>, interval: Duration) -> Task {
    polling_task(adapter, SENSOR_PREFIX, interval, |sensor: Arc<NumericSensor>| async move {
        for unit in sensor.units() {
            sensor.send_sensor_report(&unit, false).await?;
        }
        Ok(())
    })
}
