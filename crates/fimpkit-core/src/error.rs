// ── Core error types ──
//
// Errors surfaced by routing, services, scheduling and lifecycle. Wire
// failures from fimpkit-api are wrapped as-is; service-layer failures
// carry the service name and the operation that failed.

use thiserror::Error;

/// Boxed error returned by host-supplied controllers.
pub type ControllerError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Wire errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] fimpkit_api::Error),

    // ── Addressing errors ────────────────────────────────────────────
    #[error("service not found at topic {topic}")]
    ServiceNotFound { topic: String },

    #[error("service at topic {topic} is not a {expected} service")]
    IncompatibleService { topic: String, expected: String },

    // ── Service errors ───────────────────────────────────────────────
    #[error("{service}: {message}")]
    Validation { service: String, message: String },

    #[error("{service}: failed to {operation}: {source}")]
    Controller {
        service: String,
        operation: String,
        #[source]
        source: ControllerError,
    },

    #[error("{service}: failed to publish {msg_type}: {source}")]
    Publish {
        service: String,
        msg_type: String,
        #[source]
        source: fimpkit_api::Error,
    },

    // ── Refresher errors ─────────────────────────────────────────────
    #[error("refresh failed: {0}")]
    Refresh(String),

    #[error("refresh deferred by failure backoff and no cached value is available")]
    RefreshDeferred,

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("{component} is already running")]
    AlreadyRunning { component: &'static str },

    #[error("{component} is not running")]
    NotRunning { component: &'static str },

    #[error("startup failed at {step}: {source}")]
    Startup {
        step: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    #[error("reset failed: {0}")]
    Reset(String),

    // ── Observer errors ──────────────────────────────────────────────
    #[error("prime: {0}")]
    Prime(String),

    #[error("timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(service: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            service: service.to_owned(),
            message: message.into(),
        }
    }

    pub fn controller(service: &str, operation: &str, source: ControllerError) -> Self {
        Self::Controller {
            service: service.to_owned(),
            operation: operation.to_owned(),
            source,
        }
    }

    pub(crate) fn startup(step: &'static str, source: Self) -> Self {
        Self::Startup {
            step,
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Api(fimpkit_api::Error::Decode(err))
    }
}
