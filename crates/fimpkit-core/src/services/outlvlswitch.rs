//! Level output switch (`out_lvl_switch`): dimmers, blinds and anything
//! else driven by an integer level plus an on/off state.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fimpkit_api::{Message, Value, ValueType};

use crate::adapter::Adapter;
use crate::error::{ControllerError, CoreError};
use crate::router::Routing;
use crate::service::{command_voters, service_routing, Service, ServiceBase, Specification};
use crate::task::Task;

use super::outbinswitch::{CMD_BINARY_GET_REPORT, CMD_BINARY_SET, EVT_BINARY_REPORT};
use super::polling_task;

pub const OUT_LVL_SWITCH: &str = "out_lvl_switch";

pub const CMD_LVL_SET: &str = "cmd.lvl.set";
pub const CMD_LVL_GET_REPORT: &str = "cmd.lvl.get_report";
pub const EVT_LVL_REPORT: &str = "evt.lvl.report";

pub const PROP_MIN_LVL: &str = "min_lvl";
pub const PROP_MAX_LVL: &str = "max_lvl";
/// Transition time in seconds, carried on `cmd.lvl.set`.
pub const PROP_DURATION: &str = "duration";

#[async_trait]
pub trait LevelSwitchController: Send + Sync {
    async fn set_level(&self, level: i64, duration: Option<Duration>) -> Result<(), ControllerError>;

    async fn set_binary_state(&self, on: bool) -> Result<(), ControllerError>;

    async fn level_report(&self) -> Result<i64, ControllerError>;

    async fn binary_state_report(&self) -> Result<bool, ControllerError>;
}

pub struct LevelSwitch {
    base: ServiceBase,
    controller: Arc<dyn LevelSwitchController>,
}

impl LevelSwitch {
    pub fn new(base: ServiceBase, controller: Arc<dyn LevelSwitchController>) -> Self {
        Self { base, controller }
    }

    pub fn specification(
        adapter: &str,
        thing: &str,
        service_address: &str,
        min_level: i64,
        max_level: i64,
    ) -> Specification {
        Specification::device(adapter, thing, OUT_LVL_SWITCH, service_address)
            .with_prop(PROP_MIN_LVL, min_level)
            .with_prop(PROP_MAX_LVL, max_level)
            .accepts(CMD_LVL_SET, ValueType::Int)
            .accepts(CMD_LVL_GET_REPORT, ValueType::Null)
            .accepts(CMD_BINARY_SET, ValueType::Bool)
            .accepts(CMD_BINARY_GET_REPORT, ValueType::Null)
            .emits(EVT_LVL_REPORT, ValueType::Int)
            .emits(EVT_BINARY_REPORT, ValueType::Bool)
    }

    pub fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn validate_level(&self, level: i64) -> Result<(), CoreError> {
        let spec = self.base.specification();
        let min = spec.prop_i64(PROP_MIN_LVL).unwrap_or(0);
        let max = spec.prop_i64(PROP_MAX_LVL).unwrap_or(100);
        if (min..=max).contains(&level) {
            Ok(())
        } else {
            Err(CoreError::validation(
                self.name(),
                format!("level {level} outside {min}..={max}"),
            ))
        }
    }

    pub async fn set_level(&self, level: i64, duration: Option<Duration>) -> Result<(), CoreError> {
        self.validate_level(level)?;
        let _guard = self.base.lock().await;
        self.controller
            .set_level(level, duration)
            .await
            .map_err(|e| self.base.controller_error("set level", e))
    }

    pub async fn set_binary_state(&self, on: bool) -> Result<(), CoreError> {
        let _guard = self.base.lock().await;
        self.controller
            .set_binary_state(on)
            .await
            .map_err(|e| self.base.controller_error("set binary state", e))
    }

    pub async fn send_level_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let level = self
            .controller
            .level_report()
            .await
            .map_err(|e| self.base.controller_error("read level", e))?;
        let report = self.base.event(EVT_LVL_REPORT, Value::Int(level));
        self.base.send_report(force, "", report).await
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

impl Service for LevelSwitch {
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

/// Optional transition time from the `duration` property. Unparsable
/// values are a validation error rather than silently ignored.
fn duration_prop(switch: &LevelSwitch, msg: &Message) -> Result<Option<Duration>, CoreError> {
    let Some(raw) = msg.payload.property(PROP_DURATION) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| CoreError::validation(switch.name(), format!("invalid duration '{raw}'")))
}

pub fn routings(adapter: &Arc<Adapter>) -> Vec<Routing> {
    vec![
        service_routing(
            adapter,
            command_voters(adapter, OUT_LVL_SWITCH, CMD_LVL_SET),
            |switch: Arc<LevelSwitch>, msg| async move {
                let level = msg.payload.int_value()?;
                let duration = duration_prop(&switch, &msg)?;
                switch.set_level(level, duration).await?;
                switch.send_level_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, OUT_LVL_SWITCH, CMD_LVL_GET_REPORT),
            |switch: Arc<LevelSwitch>, _msg| async move {
                switch.send_level_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, OUT_LVL_SWITCH, CMD_BINARY_SET),
            |switch: Arc<LevelSwitch>, msg| async move {
                let on = msg.payload.bool_value()?;
                switch.set_binary_state(on).await?;
                switch.send_binary_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, OUT_LVL_SWITCH, CMD_BINARY_GET_REPORT),
            |switch: Arc<LevelSwitch>, _msg| async move {
                switch.send_binary_report(true).await?;
                Ok(None)
            },
        ),
    ]
}

pub fn report_task(adapter: &Arc<Adapter>, interval: Duration) -> Task {
    polling_task(adapter, OUT_LVL_SWITCH, interval, |switch: Arc<LevelSwitch>| async move {
        switch.send_level_report(false).await?;
        switch.send_binary_report(false).await?;
        Ok(())
    })
}
