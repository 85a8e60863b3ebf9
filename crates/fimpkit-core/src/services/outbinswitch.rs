//! Binary output switch (`out_bin_switch`).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fimpkit_api::{Value, ValueType};

use crate::adapter::Adapter;
use crate::error::{ControllerError, CoreError};
use crate::router::Routing;
use crate::service::{command_voters, service_routing, Service, ServiceBase, Specification};
use crate::task::Task;

use super::polling_task;

pub const OUT_BIN_SWITCH: &str = "out_bin_switch";

pub const CMD_BINARY_SET: &str = "cmd.binary.set";
pub const CMD_BINARY_GET_REPORT: &str = "cmd.binary.get_report";
pub const EVT_BINARY_REPORT: &str = "evt.binary.report";

#[async_trait]
pub trait BinarySwitchController: Send + Sync {
    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError>;

    async fn binary_state_report(&self) -> Result<bool, ControllerError>;
}

pub struct BinarySwitch {
    base: ServiceBase,
    controller: Arc<dyn BinarySwitchController>,
}

impl BinarySwitch {
    pub fn new(base: ServiceBase, controller: Arc<dyn BinarySwitchController>) -> Self {
        Self { base, controller }
    }

    pub fn specification(adapter: &str, thing: &str, service_address: &str) -> Specification {
        Specification::device(adapter, thing, OUT_BIN_SWITCH, service_address)
            .accepts(CMD_BINARY_SET, ValueType::Bool)
            .accepts(CMD_BINARY_GET_REPORT, ValueType::Null)
            .emits(EVT_BINARY_REPORT, ValueType::Bool)
    }

    pub fn base(&self) -> &ServiceBase {
        &self.base
    }

    pub async fn set_binary_state(&self, on: bool) -> Result<(), CoreError> {
        let _guard = self.base.lock().await;
        self.controller
            .set_binary_state(on)
            .await
            .map_err(|e| self.base.controller_error("set binary state", e))
    }

    pub async fn send_binary_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let on = self
            .controller
            .binary_state_report()
            .await
            .map_err(|e| self.base.controller_error("read binary state", e))?;
        let report = self.base.event(EVT_BINARY_REPORT, Value::Bool(on));
        self.base.send_report(force, "", report).await
    }
}

impl Service for BinarySwitch {
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
            command_voters(adapter, OUT_BIN_SWITCH, CMD_BINARY_SET),
            |switch: Arc<BinarySwitch>, msg| async move {
                let on = msg.payload.bool_value()?;
                switch.set_binary_state(on).await?;
                switch.send_binary_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, OUT_BIN_SWITCH, CMD_BINARY_GET_REPORT),
            |switch: Arc<BinarySwitch>, _msg| async move {
                switch.send_binary_report(true).await?;
                Ok(None)
            },
        ),
    ]
}

pub fn report_task(adapter: &Arc<Adapter>, interval: Duration) -> Task {
    polling_task(adapter, OUT_BIN_SWITCH, interval, |switch: Arc<BinarySwitch>| async move {
        switch.send_binary_report(false).await.map(|_| ())
    })
}
