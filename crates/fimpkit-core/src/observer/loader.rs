// ── Component loaders ──

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fimpkit_api::address::{MSG_TYPE_CMD, MSG_TYPE_RSP};
use fimpkit_api::{Address, Envelope, SyncClient, Transport};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use super::model::{ComponentKind, Snapshot};
use crate::error::CoreError;

pub const VINCULUM: &str = "vinculum";
pub const CMD_PD7_REQUEST: &str = "cmd.pd7.request";
pub const EVT_PD7_RESPONSE: &str = "evt.pd7.response";

/// Fetches component sets from the system of record.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, components: &[ComponentKind]) -> Result<Snapshot, CoreError>;
}

/// Loads components from the hub over a `cmd.pd7.request` exchange.
pub struct PrimeLoader {
    client: SyncClient,
    response: Address,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PrimeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Option<JsonValue>,
    #[serde(default)]
    param: Option<PrimeParam>,
}

#[derive(Debug, Default, Deserialize)]
struct PrimeParam {
    #[serde(default)]
    device: Vec<super::model::Device>,
    #[serde(default)]
    thing: Vec<super::model::Thing>,
    #[serde(default)]
    room: Vec<super::model::Room>,
    #[serde(default)]
    area: Vec<super::model::Area>,
}

impl PrimeLoader {
    /// `client_name` picks the private response topic
    /// `pt:j1/mt:rsp/rt:app/rn:<client_name>/ad:1`.
    pub fn new(transport: Arc<dyn Transport>, client_name: &str, timeout: Duration) -> Self {
        Self {
            client: SyncClient::new(transport),
            response: Address::app(MSG_TYPE_RSP, client_name, "1"),
            timeout,
        }
    }

    pub fn request_address() -> Address {
        Address::app(MSG_TYPE_CMD, VINCULUM, "1")
    }
}

#[async_trait]
impl Loader for PrimeLoader {
    async fn load(&self, components: &[ComponentKind]) -> Result<Snapshot, CoreError> {
        let names: Vec<&str> = components.iter().map(|c| c.as_str()).collect();
        let request = Envelope::new_object(
            CMD_PD7_REQUEST,
            VINCULUM,
            &json!({
                "cmd": "get",
                "component": null,
                "param": { "components": names },
            }),
        )?;

        let reply = self
            .client
            .request(&Self::request_address(), request, &self.response, self.timeout)
            .await?;
        if reply.payload.msg_type != EVT_PD7_RESPONSE {
            return Err(CoreError::Prime(format!(
                "unexpected reply type {}",
                reply.payload.msg_type
            )));
        }

        let response: PrimeResponse = reply.payload.object_into()?;
        if !response.success {
            return Err(CoreError::Prime(format!(
                "request rejected: {}",
                response.errors.unwrap_or(JsonValue::Null)
            )));
        }
        let param = response.param.unwrap_or_default();
        debug!(
            devices = param.device.len(),
            things = param.thing.len(),
            rooms = param.room.len(),
            areas = param.area.len(),
            "prime components loaded"
        );
        Ok(Snapshot {
            devices: param.device,
            things: param.thing,
            rooms: param.room,
            areas: param.area,
        })
    }
}
