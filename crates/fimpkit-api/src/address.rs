// ── Topic addressing ──
//
// FIMP topics encode a hierarchical address as slash-separated
// `key:value` segments. This module parses topics into `Address`
// values, renders them back, and builds MQTT subscription patterns.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const PAYLOAD_TYPE_JSON: &str = "j1";

pub const MSG_TYPE_CMD: &str = "cmd";
pub const MSG_TYPE_EVT: &str = "evt";
pub const MSG_TYPE_RSP: &str = "rsp";

pub const RESOURCE_TYPE_DEVICE: &str = "dev";
pub const RESOURCE_TYPE_ADAPTER: &str = "ad";
pub const RESOURCE_TYPE_APP: &str = "app";
pub const RESOURCE_TYPE_CLOUD: &str = "cloud";
pub const RESOURCE_TYPE_DISCOVERY: &str = "discovery";

/// Single-level MQTT wildcard used for unset segments in patterns.
pub const WILDCARD: &str = "+";

/// Parsed FIMP address.
///
/// Every field is a plain string; an empty string means the segment is
/// absent from the topic (or a wildcard when rendered as a pattern).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    /// Broker namespace preceding the `pt:` segment, used when several
    /// sites share one broker.
    pub global_prefix: String,
    pub payload_type: String,
    pub msg_type: String,
    pub resource_type: String,
    pub resource_name: String,
    pub resource_address: String,
    pub service_name: String,
    pub service_address: String,
}

impl Address {
    /// Address of a device service, e.g.
    /// `pt:j1/mt:cmd/rt:dev/rn:zigbee/ad:1/sv:out_bin_switch/ad:2`.
    pub fn device(
        msg_type: &str,
        resource_name: &str,
        resource_address: &str,
        service_name: &str,
        service_address: &str,
    ) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            resource_type: RESOURCE_TYPE_DEVICE.into(),
            resource_name: resource_name.into(),
            resource_address: resource_address.into(),
            service_name: service_name.into(),
            service_address: service_address.into(),
            ..Self::default()
        }
    }

    /// Address of an adapter, e.g. `pt:j1/mt:cmd/rt:ad/rn:zigbee/ad:1`.
    pub fn adapter(msg_type: &str, resource_name: &str, resource_address: &str) -> Self {
        Self::resource(msg_type, RESOURCE_TYPE_ADAPTER, resource_name, resource_address)
    }

    /// Address of an application, e.g. `pt:j1/mt:evt/rt:app/rn:vinculum/ad:1`.
    pub fn app(msg_type: &str, resource_name: &str, resource_address: &str) -> Self {
        Self::resource(msg_type, RESOURCE_TYPE_APP, resource_name, resource_address)
    }

    /// Address of a cloud service.
    pub fn cloud(msg_type: &str, resource_name: &str, resource_address: &str) -> Self {
        Self::resource(msg_type, RESOURCE_TYPE_CLOUD, resource_name, resource_address)
    }

    /// Discovery address, e.g. `pt:j1/mt:evt/rt:discovery`.
    pub fn discovery(msg_type: &str) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            resource_type: RESOURCE_TYPE_DISCOVERY.into(),
            ..Self::default()
        }
    }

    fn resource(
        msg_type: &str,
        resource_type: &str,
        resource_name: &str,
        resource_address: &str,
    ) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            resource_address: resource_address.into(),
            ..Self::default()
        }
    }

    /// Return a copy with a different message type.
    pub fn with_msg_type(mut self, msg_type: &str) -> Self {
        msg_type.clone_into(&mut self.msg_type);
        self
    }

    /// Return a copy under the given global prefix.
    pub fn with_global_prefix(mut self, prefix: &str) -> Self {
        prefix.clone_into(&mut self.global_prefix);
        self
    }

    // ── Parsing ──────────────────────────────────────────────────────

    /// Parse a full topic. Segments before the first `pt:` segment are
    /// kept as the global prefix.
    pub fn parse(topic: &str) -> Result<Self, Error> {
        let segments: Vec<&str> = topic.trim_matches('/').split('/').collect();
        let Some(start) = segments.iter().position(|s| s.starts_with("pt:")) else {
            return Err(malformed(topic, "missing pt segment"));
        };

        let (prefix, rest) = segments.split_at(start);
        let mut address = Self {
            global_prefix: prefix.join("/"),
            ..Self::default()
        };
        address.apply_segments(topic, rest)?;

        if address.msg_type.is_empty() {
            return Err(malformed(topic, "missing mt segment"));
        }
        Ok(address)
    }

    /// Parse the `/rt:…/rn:…/ad:…/sv:…/ad:…` form used in service
    /// specifications. Payload and message type stay unset.
    pub fn parse_service_path(path: &str) -> Result<Self, Error> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let mut address = Self::default();
        address.apply_segments(path, &segments)?;
        Ok(address)
    }

    fn apply_segments(&mut self, topic: &str, segments: &[&str]) -> Result<(), Error> {
        let mut seen_service = false;
        for segment in segments {
            let (key, value) = segment
                .split_once(':')
                .ok_or_else(|| malformed(topic, &format!("segment '{segment}' is not key:value")))?;
            match key {
                "pt" => value.clone_into(&mut self.payload_type),
                "mt" => value.clone_into(&mut self.msg_type),
                "rt" => value.clone_into(&mut self.resource_type),
                "rn" => value.clone_into(&mut self.resource_name),
                "ad" if seen_service => value.clone_into(&mut self.service_address),
                "ad" => value.clone_into(&mut self.resource_address),
                "sv" => {
                    value.clone_into(&mut self.service_name);
                    seen_service = true;
                }
                other => return Err(malformed(topic, &format!("unknown segment key '{other}'"))),
            }
        }
        Ok(())
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Render the address as a publishable topic. Trailing unset
    /// segments are dropped.
    pub fn to_topic(&self) -> String {
        let segments: Vec<String> = self
            .layout()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{key}:{value}"))
            .collect();
        self.join(segments)
    }

    /// Render the address as an MQTT subscription filter. Each unset
    /// segment becomes a `+` wildcard occupying the whole level.
    pub fn to_pattern(&self) -> String {
        let mut segments: Vec<String> = self
            .layout()
            .into_iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    WILDCARD.to_owned()
                } else {
                    format!("{key}:{value}")
                }
            })
            .collect();
        if self.resource_type.is_empty() {
            segments.push("#".to_owned());
        }
        self.join(segments)
    }

    /// The `/rt:…/…/ad:…` path used in service specifications.
    pub fn service_path(&self) -> String {
        let mut path = String::new();
        for (key, value) in [
            ("rt", &self.resource_type),
            ("rn", &self.resource_name),
            ("ad", &self.resource_address),
            ("sv", &self.service_name),
            ("ad", &self.service_address),
        ] {
            if !value.is_empty() {
                path.push('/');
                path.push_str(key);
                path.push(':');
                path.push_str(value);
            }
        }
        path
    }

    /// Ordered `(key, value)` segments for this resource type.
    fn layout(&self) -> Vec<(&'static str, &str)> {
        let mut layout = vec![
            ("pt", self.payload_type.as_str()),
            ("mt", self.msg_type.as_str()),
        ];
        if self.resource_type.is_empty() {
            return layout;
        }
        layout.push(("rt", self.resource_type.as_str()));
        if self.resource_type == RESOURCE_TYPE_DISCOVERY {
            return layout;
        }
        layout.push(("rn", self.resource_name.as_str()));
        layout.push(("ad", self.resource_address.as_str()));
        if self.resource_type == RESOURCE_TYPE_DEVICE || !self.service_name.is_empty() {
            layout.push(("sv", self.service_name.as_str()));
            layout.push(("ad", self.service_address.as_str()));
        }
        layout
    }

    fn join(&self, segments: Vec<String>) -> String {
        let body = segments.join("/");
        if self.global_prefix.is_empty() {
            body
        } else {
            format!("{}/{body}", self.global_prefix)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_topic())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn malformed(topic: &str, reason: &str) -> Error {
    Error::MalformedTopic {
        topic: topic.to_owned(),
        reason: reason.to_owned(),
    }
}

/// MQTT filter matching: `+` matches exactly one level, a trailing `#`
/// matches the parent level and everything below it.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) | (None, None) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            _ => return false,
        }
    }
}
