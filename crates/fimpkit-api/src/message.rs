// ── FIMP envelope ──
//
// JSON payload carried on every topic, plus the `Message` wrapper that
// pairs an envelope with its topic and parsed address.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::error::Error;
use crate::value::{Value, ValueType};

/// Wire format of `ctime`.
pub const CTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";
const CTIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

const ENVELOPE_VERSION: &str = "1";

/// Decoded FIMP payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub struct Envelope {
    /// Message kind, e.g. `cmd.binary.set` or `evt.binary.report`.
    pub msg_type: String,
    pub service: String,
    pub value: Value,
    pub properties: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub uid: String,
    pub correlation_id: String,
    pub response_to: String,
    pub source: String,
    pub version: String,
    pub created_at: Option<DateTime<FixedOffset>>,
}

impl Envelope {
    pub fn new(msg_type: &str, service: &str, value: Value) -> Self {
        Self {
            msg_type: msg_type.to_owned(),
            service: service.to_owned(),
            value,
            properties: BTreeMap::new(),
            tags: Vec::new(),
            uid: Uuid::new_v4().to_string(),
            correlation_id: String::new(),
            response_to: String::new(),
            source: String::new(),
            version: ENVELOPE_VERSION.to_owned(),
            created_at: Some(Local::now().fixed_offset()),
        }
    }

    // ── Constructors ─────────────────────────────────────────────────

    pub fn new_null(msg_type: &str, service: &str) -> Self {
        Self::new(msg_type, service, Value::Null)
    }

    pub fn new_bool(msg_type: &str, service: &str, value: bool) -> Self {
        Self::new(msg_type, service, Value::Bool(value))
    }

    pub fn new_int(msg_type: &str, service: &str, value: i64) -> Self {
        Self::new(msg_type, service, Value::Int(value))
    }

    pub fn new_float(msg_type: &str, service: &str, value: f64) -> Self {
        Self::new(msg_type, service, Value::Float(value))
    }

    pub fn new_string(msg_type: &str, service: &str, value: impl Into<String>) -> Self {
        Self::new(msg_type, service, Value::String(value.into()))
    }

    pub fn new_object<T: Serialize>(msg_type: &str, service: &str, value: &T) -> Result<Self, Error> {
        Ok(Self::new(msg_type, service, Value::object(value)?))
    }

    pub fn new_bool_map(msg_type: &str, service: &str, value: BTreeMap<String, bool>) -> Self {
        Self::new(msg_type, service, Value::BoolMap(value))
    }

    pub fn new_int_map(msg_type: &str, service: &str, value: BTreeMap<String, i64>) -> Self {
        Self::new(msg_type, service, Value::IntMap(value))
    }

    pub fn new_float_map(msg_type: &str, service: &str, value: BTreeMap<String, f64>) -> Self {
        Self::new(msg_type, service, Value::FloatMap(value))
    }

    pub fn new_str_map(msg_type: &str, service: &str, value: BTreeMap<String, String>) -> Self {
        Self::new(msg_type, service, Value::StrMap(value))
    }

    pub fn new_str_array(msg_type: &str, service: &str, value: Vec<String>) -> Self {
        Self::new(msg_type, service, Value::StrArray(value))
    }

    // ── Builders ─────────────────────────────────────────────────────

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_correlation_id(mut self, id: &str) -> Self {
        id.clone_into(&mut self.correlation_id);
        self
    }

    pub fn with_response_to(mut self, topic: &str) -> Self {
        topic.clone_into(&mut self.response_to);
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        source.clone_into(&mut self.source);
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn bool_value(&self) -> Result<bool, Error> {
        match &self.value {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch(ValueType::Bool, other)),
        }
    }

    pub fn int_value(&self) -> Result<i64, Error> {
        match &self.value {
            Value::Int(v) => Ok(*v),
            other => Err(mismatch(ValueType::Int, other)),
        }
    }

    pub fn float_value(&self) -> Result<f64, Error> {
        match &self.value {
            Value::Float(v) => Ok(*v),
            other => Err(mismatch(ValueType::Float, other)),
        }
    }

    pub fn string_value(&self) -> Result<&str, Error> {
        match &self.value {
            Value::String(v) => Ok(v),
            other => Err(mismatch(ValueType::String, other)),
        }
    }

    pub fn object_value(&self) -> Result<&serde_json::Value, Error> {
        match &self.value {
            Value::Object(v) => Ok(v),
            other => Err(mismatch(ValueType::Object, other)),
        }
    }

    /// Deserialize an object value into a concrete type.
    pub fn object_into<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_value(self.object_value()?.clone())?)
    }

    pub fn bool_map_value(&self) -> Result<&BTreeMap<String, bool>, Error> {
        match &self.value {
            Value::BoolMap(v) => Ok(v),
            other => Err(mismatch(ValueType::BoolMap, other)),
        }
    }

    pub fn int_map_value(&self) -> Result<&BTreeMap<String, i64>, Error> {
        match &self.value {
            Value::IntMap(v) => Ok(v),
            other => Err(mismatch(ValueType::IntMap, other)),
        }
    }

    pub fn float_map_value(&self) -> Result<&BTreeMap<String, f64>, Error> {
        match &self.value {
            Value::FloatMap(v) => Ok(v),
            other => Err(mismatch(ValueType::FloatMap, other)),
        }
    }

    pub fn str_map_value(&self) -> Result<&BTreeMap<String, String>, Error> {
        match &self.value {
            Value::StrMap(v) => Ok(v),
            other => Err(mismatch(ValueType::StrMap, other)),
        }
    }

    pub fn str_array_value(&self) -> Result<&[String], Error> {
        match &self.value {
            Value::StrArray(v) => Ok(v),
            other => Err(mismatch(ValueType::StrArray, other)),
        }
    }

    // ── Codec ────────────────────────────────────────────────────────

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn mismatch(expected: ValueType, actual: &Value) -> Error {
    Error::ValueType {
        expected: expected.to_string(),
        actual: actual.value_type().to_string(),
    }
}

/// Parse `ctime`, accepting any fraction width and RFC 3339 as sent by
/// some cloud components.
pub fn parse_ctime(raw: &str) -> Result<DateTime<FixedOffset>, Error> {
    DateTime::parse_from_str(raw, CTIME_PARSE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|_| Error::Timestamp(raw.to_owned()))
}

// ── Wire representation ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    msg_type: String,
    serv: String,
    val_t: String,
    #[serde(default)]
    val: serde_json::Value,
    #[serde(default)]
    props: Option<BTreeMap<String, String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    ctime: String,
    #[serde(default)]
    uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    corid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    resp_to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    src: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    ver: String,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = Error;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let value_type = ValueType::from_tag(&raw.val_t)?;
        let value = Value::from_json(value_type, raw.val)?;
        let created_at = if raw.ctime.is_empty() {
            None
        } else {
            Some(parse_ctime(&raw.ctime)?)
        };

        Ok(Self {
            msg_type: raw.msg_type,
            service: raw.serv,
            value,
            properties: raw.props.unwrap_or_default(),
            tags: raw.tags.unwrap_or_default(),
            uid: raw.uid,
            correlation_id: raw.corid,
            response_to: raw.resp_to,
            source: raw.src,
            version: raw.ver,
            created_at,
        })
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(env: Envelope) -> Self {
        Self {
            val_t: env.value.value_type().as_str().to_owned(),
            val: env.value.to_json(),
            msg_type: env.msg_type,
            serv: env.service,
            props: (!env.properties.is_empty()).then_some(env.properties),
            tags: (!env.tags.is_empty()).then_some(env.tags),
            ctime: env
                .created_at
                .map(|t| t.format(CTIME_FORMAT).to_string())
                .unwrap_or_default(),
            uid: env.uid,
            corid: env.correlation_id,
            resp_to: env.response_to,
            src: env.source,
            ver: env.version,
        }
    }
}

// ── Message ──────────────────────────────────────────────────────────

/// An envelope together with the topic it travels on.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    /// `None` for topics outside the FIMP grammar and for replies that
    /// rely on the inbound `resp_to`.
    pub address: Option<Address>,
    pub payload: Envelope,
}

impl Message {
    /// Outbound message addressed to `address`.
    pub fn new(address: Address, payload: Envelope) -> Self {
        Self {
            topic: address.to_topic(),
            address: Some(address),
            payload,
        }
    }

    /// Reply without an address of its own.
    pub fn unaddressed(payload: Envelope) -> Self {
        Self {
            topic: String::new(),
            address: None,
            payload,
        }
    }

    /// Decode an inbound frame. The payload must be a valid envelope;
    /// the topic is parsed best-effort.
    pub fn from_wire(topic: &str, bytes: &[u8]) -> Result<Self, Error> {
        let payload = Envelope::from_bytes(bytes)?;
        Ok(Self {
            topic: topic.to_owned(),
            address: Address::parse(topic).ok(),
            payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_wire_envelope() {
        let raw = json!({
            "type": "cmd.mode.set",
            "serv": "thermostat",
            "val_t": "string",
            "val": "heat",
            "props": null,
            "tags": null,
            "ctime": "2024-03-01 12:30:45.12 +0100",
            "uid": "abc",
            "resp_to": "pt:j1/mt:rsp/rt:app/rn:tester/ad:1"
        });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.msg_type, "cmd.mode.set");
        assert_eq!(env.string_value().unwrap(), "heat");
        assert_eq!(env.response_to, "pt:j1/mt:rsp/rt:app/rn:tester/ad:1");
        assert!(env.properties.is_empty());
        assert!(env.created_at.is_some());
    }

    #[test]
    fn encodes_absent_props_and_tags_as_null() {
        let env = Envelope::new_bool("evt.binary.report", "out_bin_switch", true);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["val_t"], "bool");
        assert_eq!(json["val"], true);
        assert_eq!(json["props"], serde_json::Value::Null);
        assert_eq!(json["tags"], serde_json::Value::Null);
        assert!(json.get("corid").is_none());
        assert_eq!(json["uid"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let raw = br#"{"serv":"x","val_t":"null","val":null}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn rejects_unknown_value_type() {
        let raw = br#"{"type":"evt.x","serv":"x","val_t":"decimal","val":1}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn typed_getter_reports_mismatch() {
        let env = Envelope::new_int("cmd.lvl.set", "out_lvl_switch", 10);
        let err = env.bool_value().unwrap_err();
        assert_eq!(err.to_string(), "value type mismatch: expected bool, got int");
    }

    #[test]
    fn ctime_round_trips_with_millisecond_precision() {
        let env = Envelope::new_null("cmd.binary.get_report", "out_bin_switch");
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        let original = env.created_at.unwrap();
        let parsed = decoded.created_at.unwrap();
        assert_eq!(
            original.format(CTIME_FORMAT).to_string(),
            parsed.format(CTIME_FORMAT).to_string()
        );
    }

    #[test]
    fn accepts_rfc3339_ctime() {
        assert!(parse_ctime("2019-05-31T17:02:38.213+02:00").is_ok());
        assert!(matches!(parse_ctime("yesterday"), Err(Error::Timestamp(_))));
    }

    #[test]
    fn message_from_wire_parses_address() {
        let env = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
        let topic = "pt:j1/mt:cmd/rt:dev/rn:test/ad:1/sv:out_bin_switch/ad:2";
        let msg = Message::from_wire(topic, &env.to_bytes().unwrap()).unwrap();
        assert_eq!(msg.address.unwrap().service_address, "2");
        assert_eq!(msg.payload.uid, env.uid);
        assert_eq!(msg.payload.value, Value::Bool(true));
    }
}
