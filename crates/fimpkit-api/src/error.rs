use thiserror::Error;

/// Top-level error type for the `fimpkit-api` crate.
///
/// Covers every wire-level failure mode: topic parsing, envelope
/// decoding, value-type mismatches, and MQTT transport errors.
/// `fimpkit-core` wraps these into service-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Addressing ──────────────────────────────────────────────────
    /// Topic could not be parsed into an address.
    #[error("malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },

    // ── Envelope ────────────────────────────────────────────────────
    /// Payload is not a valid JSON envelope.
    #[error("invalid envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// `val_t` tag is not one of the known value types.
    #[error("unknown value type '{0}'")]
    UnknownValueType(String),

    /// Typed getter called on an envelope carrying another value type.
    #[error("value type mismatch: expected {expected}, got {actual}")]
    ValueType { expected: String, actual: String },

    /// `ctime` could not be parsed.
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    // ── Transport ───────────────────────────────────────────────────
    /// The MQTT client rejected a request (queue closed, etc.).
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Connection-level MQTT failure.
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Publishing a message failed.
    #[error("failed to publish to '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Broker URI is missing a host or uses an unsupported scheme.
    #[error("invalid broker URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Operation requires a started transport.
    #[error("transport is not started")]
    NotStarted,

    /// Request/response exchange timed out.
    #[error("no response on '{topic}' within {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },
}

impl Error {
    /// Returns `true` if this error came from decoding inbound data
    /// rather than from the transport.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::MalformedTopic { .. }
                | Self::Decode(_)
                | Self::UnknownValueType(_)
                | Self::ValueType { .. }
                | Self::Timestamp(_)
        )
    }
}
