// ── Service base ──
//
// Shared machinery for device services: a per-service mutex that
// serializes controller access, the reporting cache, and the publish path
// for event reports. Concrete families live in `crate::services`.

mod specification;

pub use specification::{Interface, Specification};

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use fimpkit_api::{Address, Envelope, Message, Publisher};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::adapter::Adapter;
use crate::cache::{ReportingCache, ReportingStrategy};
use crate::error::{ControllerError, CoreError};
use crate::router::{processor_fn, Routing};
use crate::voter::MessageVoter;

/// A message-addressable device capability.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn specification(&self) -> &Specification;

    /// Upcast for downcasting to the concrete service type.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// ── ServiceBase ──────────────────────────────────────────────────────

pub struct ServiceBase {
    specification: Specification,
    publisher: Arc<dyn Publisher>,
    lock: Mutex<()>,
    cache: ReportingCache,
    strategy: ReportingStrategy,
}

impl ServiceBase {
    pub fn new(specification: Specification, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            specification,
            publisher,
            lock: Mutex::new(()),
            cache: ReportingCache::new(),
            strategy: ReportingStrategy::default(),
        }
    }

    pub fn with_reporting_strategy(mut self, strategy: ReportingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.specification.name
    }

    pub fn specification(&self) -> &Specification {
        &self.specification
    }

    pub fn address(&self) -> &Address {
        &self.specification.address
    }

    pub fn cache(&self) -> &ReportingCache {
        &self.cache
    }

    pub fn strategy(&self) -> ReportingStrategy {
        self.strategy
    }

    /// Serialize an operation against this service. Hold the guard for
    /// the whole read/consult/publish/mark sequence.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Reject `value` unless it is listed in the `key` property.
    pub fn validate(&self, key: &str, what: &str, value: &str) -> Result<(), CoreError> {
        if self.specification.supports(key, value) {
            Ok(())
        } else {
            Err(CoreError::validation(
                self.name(),
                format!("unsupported {what} '{value}'"),
            ))
        }
    }

    pub fn controller_error(&self, operation: &str, source: ControllerError) -> CoreError {
        CoreError::controller(self.name(), operation, source)
    }

    /// Publish `envelope` as an event report unless the cache says it is
    /// redundant. Returns whether anything was published. Callers hold
    /// [`lock`](Self::lock).
    pub async fn send_report(
        &self,
        force: bool,
        sub_key: &str,
        envelope: Envelope,
    ) -> Result<bool, CoreError> {
        let event = envelope.msg_type.clone();
        if !force
            && !self
                .cache
                .report_required(self.strategy, &event, sub_key, &envelope.value)
        {
            debug!(service = %self.name(), msg_type = %event, "report not required");
            return Ok(false);
        }

        let value = envelope.value.clone();
        self.publisher
            .publish(&self.specification.event_address(), &envelope)
            .await
            .map_err(|source| CoreError::Publish {
                service: self.name().to_owned(),
                msg_type: event.clone(),
                source,
            })?;
        self.cache.reported(&event, sub_key, value);
        Ok(true)
    }

    /// Build an event envelope carrying this service's name.
    pub fn event(&self, msg_type: &str, value: fimpkit_api::Value) -> Envelope {
        Envelope::new(msg_type, self.name(), value)
    }
}

// ── Command routing helper ───────────────────────────────────────────

/// Routing that resolves the addressed service of type `S` from the
/// adapter before calling `f`. Lookup and type mismatches surface as
/// errors, which the message handler turns into `evt.error.report`.
pub fn service_routing<S, F, Fut>(adapter: &Arc<Adapter>, voters: Vec<MessageVoter>, f: F) -> Routing
where
    S: Service,
    F: Fn(Arc<S>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, CoreError>> + Send + 'static,
{
    let adapter = Arc::clone(adapter);
    let f = Arc::new(f);
    Routing::with_processor(
        processor_fn(move |msg: Message| {
            let adapter = Arc::clone(&adapter);
            let f = Arc::clone(&f);
            async move {
                let service = adapter.service_by_topic::<S>(&msg.topic)?;
                f(service, msg).await
            }
        }),
        voters,
    )
}

/// Voters claiming `msg_type` commands for `service` on this adapter.
pub fn command_voters(adapter: &Adapter, service: &str, msg_type: &str) -> Vec<MessageVoter> {
    vec![
        MessageVoter::topic(&adapter.command_pattern(service)),
        MessageVoter::message_type(msg_type),
    ]
}
