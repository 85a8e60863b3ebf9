// ── Service specification ──
//
// Discovery metadata for one service: where it lives, which messages it
// accepts and emits, and the enumerated values it supports.

use fimpkit_api::address::{MSG_TYPE_CMD, MSG_TYPE_EVT, PAYLOAD_TYPE_JSON, RESOURCE_TYPE_DEVICE};
use fimpkit_api::{Address, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One accepted or emitted message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// `in` for commands, `out` for events.
    #[serde(rename = "intf_t")]
    pub direction: String,
    #[serde(rename = "msg_t")]
    pub msg_type: String,
    #[serde(rename = "val_t")]
    pub value_type: String,
    #[serde(default)]
    pub ver: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    #[serde(with = "service_path")]
    pub address: Address,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub props: Map<String, JsonValue>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

fn enabled_default() -> bool {
    true
}

impl Specification {
    /// Specification for a device service at
    /// `/rt:dev/rn:<adapter>/ad:<thing>/sv:<name>/ad:<service_address>`.
    pub fn device(adapter: &str, thing: &str, name: &str, service_address: &str) -> Self {
        Self {
            name: name.to_owned(),
            address: Address {
                resource_type: RESOURCE_TYPE_DEVICE.into(),
                resource_name: adapter.into(),
                resource_address: thing.into(),
                service_name: name.into(),
                service_address: service_address.into(),
                ..Address::default()
            },
            enabled: true,
            groups: Vec::new(),
            props: Map::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_owned());
        self
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.props.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interface(mut self, direction: &str, msg_type: &str, value_type: ValueType) -> Self {
        self.interfaces.push(Interface {
            direction: direction.to_owned(),
            msg_type: msg_type.to_owned(),
            value_type: value_type.as_str().to_owned(),
            ver: "1".to_owned(),
        });
        self
    }

    /// Add an inbound command interface.
    pub fn accepts(self, msg_type: &str, value_type: ValueType) -> Self {
        self.with_interface("in", msg_type, value_type)
    }

    /// Add an outbound event interface.
    pub fn emits(self, msg_type: &str, value_type: ValueType) -> Self {
        self.with_interface("out", msg_type, value_type)
    }

    // ── Property access ──────────────────────────────────────────────

    /// String list property such as `sup_modes`; empty when absent.
    pub fn prop_strings(&self, key: &str) -> Vec<String> {
        self.props
            .get(key)
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn prop_i64(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(JsonValue::as_i64)
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(JsonValue::as_str)
    }

    /// Whether `value` appears in the list property `key`.
    pub fn supports(&self, key: &str, value: &str) -> bool {
        self.prop_strings(key).iter().any(|v| v == value)
    }

    pub fn accepts_msg_type(&self, msg_type: &str) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.direction == "in" && i.msg_type == msg_type)
    }

    /// Address events are published to.
    pub fn event_address(&self) -> Address {
        self.address_with(MSG_TYPE_EVT)
    }

    /// Address commands arrive on.
    pub fn command_address(&self) -> Address {
        self.address_with(MSG_TYPE_CMD)
    }

    fn address_with(&self, msg_type: &str) -> Address {
        Address {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            ..self.address.clone()
        }
    }
}

mod service_path {
    use fimpkit_api::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&address.service_path())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let path = String::deserialize(deserializer)?;
        Address::parse_service_path(&path).map_err(serde::de::Error::custom)
    }
}
