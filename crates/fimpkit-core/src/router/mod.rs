// ── Message router ──
//
// A pool of workers draining one transport channel. Each message is
// matched against every routing in declaration order within a single
// worker; replies are published to the inbound `resp_to` or to the
// reply's own address. Handler panics are contained per routing.

mod handler;

pub use handler::{
    error_report, handler_fn, processor_fn, Handler, MessageHandler, Processor, Routing,
    EVT_ERROR_REPORT,
};

use std::sync::Arc;

use fimpkit_api::{Address, Message, Transport};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::panic::panic_message;

const DEFAULT_WORKERS: usize = 5;
const DEFAULT_BUFFER: usize = 10;

pub type PanicCallback = Arc<dyn Fn(&Message, &str) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type ResponseCallback = Arc<dyn Fn(&Message, &Message) + Send + Sync>;

// ── RouterConfig ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RouterConfig {
    workers: usize,
    buffer: usize,
    preserve_global_prefix: bool,
    on_panic: Option<PanicCallback>,
    on_message: Option<MessageCallback>,
    on_response: Option<ResponseCallback>,
    on_process: Option<MessageCallback>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            buffer: DEFAULT_BUFFER,
            preserve_global_prefix: false,
            on_panic: None,
            on_message: None,
            on_response: None,
            on_process: None,
        }
    }
}

impl RouterConfig {
    /// Number of concurrent workers; clamped to at least one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Capacity of the inbound channel; clamped to at least one.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Replies inherit the inbound message's global prefix.
    pub fn with_preserve_global_prefix(mut self, preserve: bool) -> Self {
        self.preserve_global_prefix = preserve;
        self
    }

    pub fn on_panic(mut self, f: impl Fn(&Message, &str) + Send + Sync + 'static) -> Self {
        self.on_panic = Some(Arc::new(f));
        self
    }

    /// Called once per received message, before routing.
    pub fn on_message(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called with `(inbound, outbound)` right before a reply is published.
    pub fn on_response(mut self, f: impl Fn(&Message, &Message) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Arc::new(f));
        self
    }

    /// Called for every routing that accepts a message, before its handler.
    pub fn on_process(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.on_process = Some(Arc::new(f));
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("workers", &self.workers)
            .field("buffer", &self.buffer)
            .field("preserve_global_prefix", &self.preserve_global_prefix)
            .finish_non_exhaustive()
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<RouterInner>`.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    transport: Arc<dyn Transport>,
    channel_id: String,
    routings: Vec<Routing>,
    config: RouterConfig,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    workers: TaskTracker,
}

impl Router {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel_id: &str,
        routings: Vec<Routing>,
        config: RouterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                transport,
                channel_id: channel_id.to_owned(),
                routings,
                config,
                running: Mutex::new(None),
            }),
        }
    }

    pub fn routings(&self) -> &[Routing] {
        &self.inner.routings
    }

    /// Deduplicated subscription patterns needed by all routings, in
    /// declaration order.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.inner.routings.iter().flat_map(Routing::topics) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register a fresh channel with the transport and spawn the workers.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyRunning { component: "router" });
        }

        let (tx, rx) = mpsc::channel(self.inner.config.buffer);
        self.inner
            .transport
            .register_channel(&self.inner.channel_id, tx);

        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();
        for worker in 0..self.inner.config.workers {
            workers.spawn(worker_loop(
                Arc::clone(&self.inner),
                worker,
                Arc::clone(&rx),
                cancel.clone(),
            ));
        }
        workers.close();

        info!(
            channel = %self.inner.channel_id,
            workers = self.inner.config.workers,
            routings = self.inner.routings.len(),
            "router started"
        );
        *running = Some(Running { cancel, workers });
        Ok(())
    }

    /// Unregister the channel, signal the workers and wait for them.
    /// In-flight handlers run to completion.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let Some(running) = self.inner.running.lock().await.take() else {
            return Err(CoreError::NotRunning { component: "router" });
        };

        self.inner
            .transport
            .unregister_channel(&self.inner.channel_id);
        running.cancel.cancel();
        running.workers.wait().await;

        info!(channel = %self.inner.channel_id, "router stopped");
        Ok(())
    }
}

// ── Workers ──────────────────────────────────────────────────────────

async fn worker_loop(
    inner: Arc<RouterInner>,
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    cancel: CancellationToken,
) {
    debug!(worker, "router worker started");
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = async { rx.lock().await.recv().await } => msg,
        };
        let Some(msg) = msg else { break };
        inner.dispatch(&msg).await;
    }
    debug!(worker, "router worker exiting");
}

impl RouterInner {
    async fn dispatch(&self, msg: &Message) {
        if let Some(on_message) = &self.config.on_message {
            on_message(msg);
        }

        for routing in &self.routings {
            let outcome = AssertUnwindSafe(self.process(routing, msg))
                .catch_unwind()
                .await;

            if let Err(payload) = outcome {
                let reason = panic_message(payload.as_ref());
                error!(
                    topic = %msg.topic,
                    service = %msg.payload.service,
                    msg_type = %msg.payload.msg_type,
                    panic = %reason,
                    "routing handler panicked"
                );
                if let Some(on_panic) = &self.config.on_panic {
                    on_panic(msg, &reason);
                }
            }
        }
    }

    async fn process(&self, routing: &Routing, msg: &Message) {
        if !routing.matches(msg) {
            return;
        }
        if let Some(on_process) = &self.config.on_process {
            on_process(msg);
        }

        let Some(mut reply) = routing.handler().handle(msg).await else {
            return;
        };

        let Some(address) = self.reply_address(msg, &reply) else {
            debug!(
                topic = %msg.topic,
                msg_type = %reply.payload.msg_type,
                "reply has no address, dropping"
            );
            return;
        };

        if reply.payload.correlation_id.is_empty() {
            reply.payload.correlation_id.clone_from(&msg.payload.uid);
        }
        reply.topic = address.to_topic();
        reply.address = Some(address);

        if let Some(on_response) = &self.config.on_response {
            on_response(msg, &reply);
        }

        let Some(address) = reply.address.as_ref() else {
            return;
        };
        if let Err(e) = self.transport.publish(address, &reply.payload).await {
            error!(
                topic = %reply.topic,
                payload = %serde_json::to_string(&reply.payload).unwrap_or_default(),
                error = %e,
                "failed to publish reply"
            );
        }
    }

    /// `resp_to` wins, then the reply's own address.
    fn reply_address(&self, inbound: &Message, reply: &Message) -> Option<Address> {
        let mut address = if inbound.payload.response_to.is_empty() {
            reply.address.clone()
        } else {
            match Address::parse(&inbound.payload.response_to) {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(
                        resp_to = %inbound.payload.response_to,
                        error = %e,
                        "invalid resp_to, using reply address"
                    );
                    reply.address.clone()
                }
            }
        }?;

        if self.config.preserve_global_prefix {
            if let Some(inbound_address) = &inbound.address {
                address
                    .global_prefix
                    .clone_from(&inbound_address.global_prefix);
            }
        }
        Some(address)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fimpkit_api::MemoryTransport;

    #[test]
    fn config_clamps_workers_and_buffer() {
        let config = RouterConfig::default().with_workers(0).with_buffer(0);
        assert_eq!(config.workers(), 1);
        assert_eq!(config.buffer(), 1);

        let config = RouterConfig::default();
        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.buffer(), DEFAULT_BUFFER);
    }

    #[tokio::test]
    async fn double_start_and_double_stop_fail() {
        let transport = Arc::new(MemoryTransport::new());
        let router = Router::new(transport, "test", Vec::new(), RouterConfig::default());

        router.start().await.unwrap();
        assert!(matches!(
            router.start().await,
            Err(CoreError::AlreadyRunning { .. })
        ));
        router.stop().await.unwrap();
        assert!(matches!(
            router.stop().await,
            Err(CoreError::NotRunning { .. })
        ));
        router.start().await.unwrap();
        router.stop().await.unwrap();
    }

    #[test]
    fn topics_are_deduplicated() {
        let transport = Arc::new(MemoryTransport::new());
        let routing = |t: &str| {
            Routing::new(
                handler_fn(|_msg: Message| async { None }),
                vec![crate::voter::MessageVoter::Topic(t.into())],
            )
        };
        let router = Router::new(
            transport,
            "test",
            vec![routing("a/#"), routing("b/#"), routing("a/#")],
            RouterConfig::default(),
        );
        assert_eq!(router.topics(), vec!["a/#".to_owned(), "b/#".to_owned()]);
    }
}
