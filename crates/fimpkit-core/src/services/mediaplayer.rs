//! Media player (`media_player`): playback, volume and mute.

use std::any::Any;
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

pub const MEDIA_PLAYER: &str = "media_player";

pub const CMD_PLAYBACK_SET: &str = "cmd.playback.set";
pub const CMD_PLAYBACK_GET_REPORT: &str = "cmd.playback.get_report";
pub const EVT_PLAYBACK_REPORT: &str = "evt.playback.report";
pub const CMD_VOLUME_SET: &str = "cmd.volume.set";
pub const CMD_VOLUME_GET_REPORT: &str = "cmd.volume.get_report";
pub const EVT_VOLUME_REPORT: &str = "evt.volume.report";
pub const CMD_MUTE_SET: &str = "cmd.mute.set";
pub const CMD_MUTE_GET_REPORT: &str = "cmd.mute.get_report";
pub const EVT_MUTE_REPORT: &str = "evt.mute.report";

pub const PROP_SUP_PLAYBACK: &str = "sup_playback";

const MAX_VOLUME: i64 = 100;

#[async_trait]
pub trait MediaPlayerController: Send + Sync {
    async fn set_playback(&self, action: &str) -> Result<(), ControllerError>;

    async fn set_volume(&self, volume: i64) -> Result<(), ControllerError>;

    async fn set_mute(&self, mute: bool) -> Result<(), ControllerError>;

    async fn playback_report(&self) -> Result<String, ControllerError>;

    async fn volume_report(&self) -> Result<i64, ControllerError>;

    async fn mute_report(&self) -> Result<bool, ControllerError>;
}

pub struct MediaPlayer {
    base: ServiceBase,
    controller: Arc<dyn MediaPlayerController>,
}

impl MediaPlayer {
    pub fn new(base: ServiceBase, controller: Arc<dyn MediaPlayerController>) -> Self {
        Self { base, controller }
    }

    pub fn specification(adapter: &str, thing: &str, service_address: &str, playback: &[&str]) -> Specification {
        Specification::device(adapter, thing, MEDIA_PLAYER, service_address)
            .with_prop(PROP_SUP_PLAYBACK, json!(playback))
            .accepts(CMD_PLAYBACK_SET, ValueType::String)
            .accepts(CMD_PLAYBACK_GET_REPORT, ValueType::Null)
            .accepts(CMD_VOLUME_SET, ValueType::Int)
            .accepts(CMD_VOLUME_GET_REPORT, ValueType::Null)
            .accepts(CMD_MUTE_SET, ValueType::Bool)
            .accepts(CMD_MUTE_GET_REPORT, ValueType::Null)
            .emits(EVT_PLAYBACK_REPORT, ValueType::String)
            .emits(EVT_VOLUME_REPORT, ValueType::Int)
            .emits(EVT_MUTE_REPORT, ValueType::Bool)
    }

    pub fn base(&self) -> &ServiceBase {
        &self.base
    }

    pub async fn set_playback(&self, action: &str) -> Result<(), CoreError> {
        self.base.validate(PROP_SUP_PLAYBACK, "playback", action)?;
        let _guard = self.base.lock().await;
        self.controller
            .set_playback(action)
            .await
            .map_err(|e| self.base.controller_error("set playback", e))
    }

    pub async fn set_volume(&self, volume: i64) -> Result<(), CoreError> {
        if !(0..=MAX_VOLUME).contains(&volume) {
            return Err(CoreError::validation(
                self.name(),
                format!("volume {volume} outside 0..={MAX_VOLUME}"),
            ));
        }
        let _guard = self.base.lock().await;
        self.controller
            .set_volume(volume)
            .await
            .map_err(|e| self.base.controller_error("set volume", e))
    }

    pub async fn set_mute(&self, mute: bool) -> Result<(), CoreError> {
        let _guard = self.base.lock().await;
        self.controller
            .set_mute(mute)
            .await
            .map_err(|e| self.base.controller_error("set mute", e))
    }

    pub async fn send_playback_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let playback = self
            .controller
            .playback_report()
            .await
            .map_err(|e| self.base.controller_error("read playback", e))?;
        self.base.validate(PROP_SUP_PLAYBACK, "playback", &playback)?;
        let report = self.base.event(EVT_PLAYBACK_REPORT, Value::String(playback));
        self.base.send_report(force, "", report).await
    }

    pub async fn send_volume_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let volume = self
            .controller
            .volume_report()
            .await
            .map_err(|e| self.base.controller_error("read volume", e))?;
        let report = self.base.event(EVT_VOLUME_REPORT, Value::Int(volume));
        self.base.send_report(force, "", report).await
    }

    pub async fn send_mute_report(&self, force: bool) -> Result<bool, CoreError> {
        let _guard = self.base.lock().await;
        let mute = self
            .controller
            .mute_report()
            .await
            .map_err(|e| self.base.controller_error("read mute", e))?;
        let report = self.base.event(EVT_MUTE_REPORT, Value::Bool(mute));
        self.base.send_report(force, "", report).await
    }
}

impl Service for MediaPlayer {
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
            command_voters(adapter, MEDIA_PLAYER, CMD_PLAYBACK_SET),
            |player: Arc<MediaPlayer>, msg| async move {
                player.set_playback(msg.payload.string_value()?).await?;
                player.send_playback_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, MEDIA_PLAYER, CMD_PLAYBACK_GET_REPORT),
            |player: Arc<MediaPlayer>, _msg| async move {
                player.send_playback_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, MEDIA_PLAYER, CMD_VOLUME_SET),
            |player: Arc<MediaPlayer>, msg| async move {
                player.set_volume(msg.payload.int_value()?).await?;
                player.send_volume_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, MEDIA_PLAYER, CMD_VOLUME_GET_REPORT),
            |player: Arc<MediaPlayer>, _msg| async move {
                player.send_volume_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, MEDIA_PLAYER, CMD_MUTE_SET),
            |player: Arc<MediaPlayer>, msg| async move {
                player.set_mute(msg.payload.bool_value()?).await?;
                player.send_mute_report(true).await?;
                Ok(None)
            },
        ),
        service_routing(
            adapter,
            command_voters(adapter, MEDIA_PLAYER, CMD_MUTE_GET_REPORT),
            |player: Arc<MediaPlayer>, _msg| async move {
                player.send_mute_report(true).await?;
                Ok(None)
            },
        ),
    ]
}

pub fn report_task(adapter: &Arc<Adapter>, interval: Duration) -> Task {
    polling_task(adapter, MEDIA_PLAYER, interval, |player: Arc<MediaPlayer>| async move {
        player.send_playback_report(false).await?;
        player.send_volume_report(false).await?;
        player.send_mute_report(false).await?;
        Ok(())
    })
}
