// ── Voters ──
//
// Boolean predicates that gate work. Message voters decide whether a
// routing handles an inbound message; state voters decide whether a
// periodic task fires on a given tick.

use std::fmt;
use std::sync::Arc;

use fimpkit_api::{topic_matches, Address, Message, ValueType};

// ── Message voters ───────────────────────────────────────────────────

/// Predicate over an inbound message.
#[derive(Clone)]
pub enum MessageVoter {
    /// Topic matches an MQTT filter. Also declares the subscription the
    /// routing needs.
    Topic(String),
    /// Envelope `type` equals the value.
    MessageType(String),
    ResourceType(String),
    ResourceName(String),
    /// Service name of the topic, or the envelope `serv` for topics
    /// without one.
    Service(String),
    ServicePrefix(String),
    PayloadType(String),
    ValueType(ValueType),
    Source(String),
    And(Vec<MessageVoter>),
    Or(Vec<MessageVoter>),
    Not(Box<MessageVoter>),
    Custom(Arc<dyn Fn(&Message) -> bool + Send + Sync>),
}

impl MessageVoter {
    /// Topic voter for the subscription pattern of `address`.
    pub fn topic(address: &Address) -> Self {
        Self::Topic(address.to_pattern())
    }

    pub fn message_type(msg_type: &str) -> Self {
        Self::MessageType(msg_type.to_owned())
    }

    pub fn service(name: &str) -> Self {
        Self::Service(name.to_owned())
    }

    pub fn service_prefix(prefix: &str) -> Self {
        Self::ServicePrefix(prefix.to_owned())
    }

    pub fn custom(f: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn vote(&self, msg: &Message) -> bool {
        let address = msg.address.as_ref();
        match self {
            Self::Topic(pattern) => {
                topic_matches(pattern, &msg.topic)
                    || unprefixed_topic(msg).is_some_and(|topic| topic_matches(pattern, topic))
            }
            Self::MessageType(t) => msg.payload.msg_type == *t,
            Self::ResourceType(t) => address.is_some_and(|a| a.resource_type == *t),
            Self::ResourceName(n) => address.is_some_and(|a| a.resource_name == *n),
            Self::Service(name) => service_name(msg) == name,
            Self::ServicePrefix(prefix) => service_name(msg).starts_with(prefix.as_str()),
            Self::PayloadType(t) => address.is_some_and(|a| a.payload_type == *t),
            Self::ValueType(t) => msg.payload.value_type() == *t,
            Self::Source(s) => msg.payload.source == *s,
            Self::And(voters) => voters.iter().all(|v| v.vote(msg)),
            Self::Or(voters) => voters.iter().any(|v| v.vote(msg)),
            Self::Not(voter) => !voter.vote(msg),
            Self::Custom(f) => f(msg),
        }
    }

    /// Subscription patterns declared by this voter tree. Negated
    /// branches declare nothing.
    pub fn topics(&self) -> Vec<String> {
        match self {
            Self::Topic(pattern) => vec![pattern.clone()],
            Self::And(voters) | Self::Or(voters) => {
                voters.iter().flat_map(Self::topics).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Topic with the global prefix removed, for prefixed (federated) topics.
fn unprefixed_topic(msg: &Message) -> Option<&str> {
    let prefix = msg.address.as_ref().map(|a| a.global_prefix.as_str())?;
    if prefix.is_empty() {
        return None;
    }
    msg.topic.strip_prefix(prefix)?.strip_prefix('/')
}

fn service_name(msg: &Message) -> &str {
    match &msg.address {
        Some(address) if !address.service_name.is_empty() => &address.service_name,
        _ => &msg.payload.service,
    }
}

impl fmt::Debug for MessageVoter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(p) => f.debug_tuple("Topic").field(p).finish(),
            Self::MessageType(t) => f.debug_tuple("MessageType").field(t).finish(),
            Self::ResourceType(t) => f.debug_tuple("ResourceType").field(t).finish(),
            Self::ResourceName(n) => f.debug_tuple("ResourceName").field(n).finish(),
            Self::Service(s) => f.debug_tuple("Service").field(s).finish(),
            Self::ServicePrefix(p) => f.debug_tuple("ServicePrefix").field(p).finish(),
            Self::PayloadType(t) => f.debug_tuple("PayloadType").field(t).finish(),
            Self::ValueType(t) => f.debug_tuple("ValueType").field(t).finish(),
            Self::Source(s) => f.debug_tuple("Source").field(s).finish(),
            Self::And(v) => f.debug_tuple("And").field(v).finish(),
            Self::Or(v) => f.debug_tuple("Or").field(v).finish(),
            Self::Not(v) => f.debug_tuple("Not").field(v).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ── State voters ─────────────────────────────────────────────────────

/// Predicate over ambient runtime state.
pub trait Voter: Send + Sync {
    fn vote(&self) -> bool;
}

impl<F> Voter for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn vote(&self) -> bool {
        self()
    }
}

pub type SharedVoter = Arc<dyn Voter>;

/// Wrap a closure as a shared voter.
pub fn voter(f: impl Fn() -> bool + Send + Sync + 'static) -> SharedVoter {
    Arc::new(f)
}

/// True when every voter agrees; true for an empty set.
pub fn all(voters: Vec<SharedVoter>) -> SharedVoter {
    Arc::new(move || voters.iter().all(|v| v.vote()))
}

/// True when any voter agrees; false for an empty set.
pub fn any(voters: Vec<SharedVoter>) -> SharedVoter {
    Arc::new(move || voters.iter().any(|v| v.vote()))
}

pub fn negate(voter: SharedVoter) -> SharedVoter {
    Arc::new(move || !voter.vote())
}
