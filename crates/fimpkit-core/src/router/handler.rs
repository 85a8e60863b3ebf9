// ── Routings and handlers ──
//
// A routing pairs a handler with the voters that claim a message for it.
// `MessageHandler` adapts fallible processors to the router, turning
// errors into `evt.error.report` replies on the inbound topic.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use fimpkit_api::{Envelope, Message};

use crate::error::CoreError;
use crate::voter::MessageVoter;

pub const EVT_ERROR_REPORT: &str = "evt.error.report";

/// Consumes a message and optionally produces a reply.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, msg: &Message) -> Option<Message>;
}

/// Fallible message processing, wrapped by [`MessageHandler`].
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, msg: &Message) -> Result<Option<Message>, CoreError>;
}

// ── Routing ──────────────────────────────────────────────────────────

/// Immutable handler + voters pair.
#[derive(Clone)]
pub struct Routing {
    handler: Arc<dyn Handler>,
    voters: Vec<MessageVoter>,
}

impl Routing {
    pub fn new(handler: Arc<dyn Handler>, voters: Vec<MessageVoter>) -> Self {
        Self { handler, voters }
    }

    /// Routing whose handler wraps `processor` with error reporting.
    pub fn with_processor(processor: Arc<dyn Processor>, voters: Vec<MessageVoter>) -> Self {
        Self::new(Arc::new(MessageHandler::new(processor)), voters)
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn voters(&self) -> &[MessageVoter] {
        &self.voters
    }

    /// Every voter must agree.
    pub fn matches(&self, msg: &Message) -> bool {
        self.voters.iter().all(|v| v.vote(msg))
    }

    /// Subscription patterns declared by the topic voters.
    pub fn topics(&self) -> Vec<String> {
        self.voters.iter().flat_map(MessageVoter::topics).collect()
    }
}

impl std::fmt::Debug for Routing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routing")
            .field("voters", &self.voters)
            .finish_non_exhaustive()
    }
}

// ── MessageHandler ───────────────────────────────────────────────────

pub struct MessageHandler {
    processor: Arc<dyn Processor>,
    silent: bool,
}

impl MessageHandler {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self {
            processor,
            silent: false,
        }
    }

    /// Log errors without replying.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

#[async_trait]
impl Handler for MessageHandler {
    async fn handle(&self, msg: &Message) -> Option<Message> {
        match self.processor.process(msg).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    topic = %msg.topic,
                    msg_type = %msg.payload.msg_type,
                    error = %e,
                    "failed to process message"
                );
                (!self.silent).then(|| error_report(msg, &e))
            }
        }
    }
}

/// `evt.error.report` addressed back to the inbound topic.
pub fn error_report(msg: &Message, err: &CoreError) -> Message {
    let envelope = Envelope::new_string(EVT_ERROR_REPORT, &msg.payload.service, err.to_string());
    match &msg.address {
        Some(address) => Message::new(address.clone(), envelope),
        None => Message::unaddressed(envelope),
    }
}

// ── Closure adapters ─────────────────────────────────────────────────

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, CoreError>> + Send + 'static,
{
    async fn process(&self, msg: &Message) -> Result<Option<Message>, CoreError> {
        (self.0)(msg.clone()).await
    }
}

/// Wrap an async closure as a [`Processor`].
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn Processor>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, CoreError>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Message>> + Send + 'static,
{
    async fn handle(&self, msg: &Message) -> Option<Message> {
        (self.0)(msg.clone()).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Message>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
