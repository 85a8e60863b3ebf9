// ── Application root ──
//
// Owns the transport, router, task manager and host components, and
// drives them through startup, shutdown and factory reset in a fixed
// order. `run` blocks until SIGINT/SIGTERM or a completed reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use fimpkit_api::address::{MSG_TYPE_CMD, MSG_TYPE_EVT};
use fimpkit_api::{Address, Envelope, Message, Transport};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::lifecycle::{AppState, ConnectionState, Lifecycle};
use crate::router::{handler_fn, processor_fn, MessageHandler, Router, RouterConfig, Routing};
use crate::task::{Task, TaskManager};
use crate::voter::MessageVoter;

pub const EVT_GATEWAY_FACTORY_RESET: &str = "evt.gateway.factory_reset";
pub const CMD_APP_GET_STATE: &str = "cmd.app.get_state";
pub const EVT_APP_STATE_REPORT: &str = "evt.app.state_report";
pub const CMD_CONFIG_GET_EXTENDED_REPORT: &str = "cmd.config.get_extended_report";
pub const EVT_CONFIG_EXTENDED_REPORT: &str = "evt.config.extended_report";

const DEFAULT_CHANNEL_ID: &str = "fimpkit-router";

/// `pt:j1/mt:evt/rt:ad/rn:gateway/ad:1`
pub fn factory_reset_address() -> Address {
    Address::adapter(MSG_TYPE_EVT, "gateway", "1")
}

/// A host unit started after the transport and stopped before it.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), CoreError>;

    async fn stop(&self) -> Result<(), CoreError>;
}

/// Clears host state on factory reset.
#[async_trait]
pub trait Resetter: Send + Sync {
    async fn reset(&self) -> Result<(), CoreError>;
}

/// Supplies the body of `evt.config.extended_report`.
pub type ExtendedReport = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

// ── AppBuilder ───────────────────────────────────────────────────────

pub struct AppBuilder {
    transport: Arc<dyn Transport>,
    channel_id: String,
    routings: Vec<Routing>,
    tasks: Vec<Task>,
    components: Vec<Arc<dyn Component>>,
    resetters: Vec<Arc<dyn Resetter>>,
    topics: Vec<String>,
    router_config: RouterConfig,
    lifecycle: Lifecycle,
    app_address: Option<Address>,
    extended_report: Option<ExtendedReport>,
}

impl AppBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            channel_id: DEFAULT_CHANNEL_ID.to_owned(),
            routings: Vec::new(),
            tasks: Vec::new(),
            components: Vec::new(),
            resetters: Vec::new(),
            topics: Vec::new(),
            router_config: RouterConfig::default(),
            lifecycle: Lifecycle::new(),
            app_address: None,
            extended_report: None,
        }
    }

    pub fn channel_id(mut self, id: &str) -> Self {
        id.clone_into(&mut self.channel_id);
        self
    }

    pub fn routing(mut self, routing: Routing) -> Self {
        self.routings.push(routing);
        self
    }

    pub fn routings(mut self, routings: impl IntoIterator<Item = Routing>) -> Self {
        self.routings.extend(routings);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    pub fn resetter(mut self, resetter: Arc<dyn Resetter>) -> Self {
        self.resetters.push(resetter);
        self
    }

    /// Subscribe `topic` in addition to what the routings need.
    pub fn topic(mut self, topic: &str) -> Self {
        self.topics.push(topic.to_owned());
        self
    }

    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Adapter address answering `cmd.app.get_state` and
    /// `cmd.config.get_extended_report`, e.g. `rt:ad/rn:<name>/ad:1`.
    pub fn app_address(mut self, address: Address) -> Self {
        self.app_address = Some(address);
        self
    }

    pub fn extended_report(mut self, report: impl Fn() -> serde_json::Value + Send + Sync + 'static) -> Self {
        self.extended_report = Some(Arc::new(report));
        self
    }

    pub fn build(self) -> Arc<App> {
        Arc::new_cyclic(|app: &Weak<App>| {
            let mut routings = vec![factory_reset_routing(app.clone())];
            if let Some(address) = &self.app_address {
                routings.push(state_report_routing(address, self.lifecycle.clone()));
                if let Some(report) = &self.extended_report {
                    routings.push(extended_report_routing(address, Arc::clone(report)));
                }
            }
            routings.extend(self.routings);

            let router = Router::new(
                Arc::clone(&self.transport),
                &self.channel_id,
                routings,
                self.router_config,
            );

            let mut topics = router.topics();
            for topic in self.topics {
                if !topics.contains(&topic) {
                    topics.push(topic);
                }
            }

            App {
                transport: self.transport,
                router,
                tasks: TaskManager::new(self.tasks),
                components: self.components,
                resetters: self.resetters,
                topics,
                lifecycle: self.lifecycle,
                running: Mutex::new(None),
                resetting: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }
        })
    }
}

// ── App ──────────────────────────────────────────────────────────────

pub struct App {
    transport: Arc<dyn Transport>,
    router: Router,
    tasks: TaskManager,
    components: Vec<Arc<dyn Component>>,
    resetters: Vec<Arc<dyn Resetter>>,
    topics: Vec<String>,
    lifecycle: Lifecycle,
    /// Cancels the connection watcher while running.
    running: Mutex<Option<CancellationToken>>,
    resetting: AtomicBool,
    shutdown: CancellationToken,
}

impl App {
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Deduplicated subscription patterns.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Cancelled once a factory reset has completed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Transport → components → router → subscriptions → tasks. The
    /// first failing step aborts startup.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyRunning { component: "app" });
        }

        self.lifecycle.set_app_state(AppState::Starting);
        let mut started = Started::default();
        match self.start_steps(&mut started).await {
            Ok(()) => {
                *running = Some(self.watch_connection());
                self.lifecycle.set_app_state(AppState::Running);
                info!(topics = self.topics.len(), "app started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "app startup failed");
                self.roll_back(&started).await;
                self.lifecycle.set_app_state(AppState::StartupError);
                Err(e)
            }
        }
    }

    async fn start_steps(&self, started: &mut Started) -> Result<(), CoreError> {
        self.transport
            .start()
            .await
            .map_err(|e| CoreError::startup("transport", e.into()))?;
        started.transport = true;
        for component in &self.components {
            debug!(component = %component.name(), "starting component");
            component
                .start()
                .await
                .map_err(|e| CoreError::startup("component", e))?;
            started.components += 1;
        }
        self.router
            .start()
            .await
            .map_err(|e| CoreError::startup("router", e))?;
        started.router = true;
        self.transport
            .subscribe(&self.topics)
            .await
            .map_err(|e| CoreError::startup("subscribe", e.into()))?;
        started.subscribed = true;
        self.tasks
            .start()
            .await
            .map_err(|e| CoreError::startup("tasks", e))
    }

    /// Undo the steps a failed start completed, newest first, so a later
    /// `start` begins from scratch. Failures here are only logged.
    async fn roll_back(&self, started: &Started) {
        if started.subscribed {
            log_rollback(
                "unsubscribe",
                self.transport
                    .unsubscribe(&self.topics)
                    .await
                    .map_err(CoreError::from),
            );
        }
        if started.router {
            log_rollback("router", self.router.stop().await);
        }
        for component in self.components.iter().take(started.components).rev() {
            log_rollback(component.name(), component.stop().await);
        }
        if started.transport {
            log_rollback("transport", self.transport.stop().await.map_err(CoreError::from));
        }
    }

    /// Tasks → unsubscribe → router → components → transport. Every step
    /// runs; the first failure is returned.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let Some(watcher) = self.running.lock().await.take() else {
            return Err(CoreError::NotRunning { component: "app" });
        };
        self.lifecycle.set_app_state(AppState::Terminating);
        watcher.cancel();

        let mut first_error = None;
        keep_first(&mut first_error, "tasks", self.tasks.stop().await);
        keep_first(
            &mut first_error,
            "unsubscribe",
            self.transport
                .unsubscribe(&self.topics)
                .await
                .map_err(CoreError::from),
        );
        keep_first(&mut first_error, "router", self.router.stop().await);
        for component in self.components.iter().rev() {
            keep_first(&mut first_error, component.name(), component.stop().await);
        }
        keep_first(
            &mut first_error,
            "transport",
            self.transport.stop().await.map_err(CoreError::from),
        );

        info!(clean = first_error.is_none(), "app stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Stop (tolerating failures), run every resetter in order, then
    /// release [`run`](Self::run). Returns the first resetter failure.
    /// A reset requested while another is in progress is a no-op; once it
    /// finishes, the next request runs the resetters again.
    pub async fn reset(&self) -> Result<(), CoreError> {
        if self.resetting.swap(true, Ordering::SeqCst) {
            debug!("factory reset already in progress");
            return Ok(());
        }
        let _guard = ResetGuard(&self.resetting);
        info!("factory reset started");

        if let Err(e) = self.stop().await {
            warn!(error = %e, "stop during factory reset failed, continuing");
        }

        let mut first_error = None;
        for resetter in &self.resetters {
            if let Err(e) = resetter.reset().await {
                warn!(error = %e, "resetter failed");
                first_error.get_or_insert(e);
            }
        }

        self.shutdown.cancel();
        info!(clean = first_error.is_none(), "factory reset finished");
        first_error.map_or(Ok(()), Err)
    }

    /// Start, then block until SIGINT/SIGTERM (followed by a graceful
    /// stop) or a completed factory reset.
    pub async fn run(&self) -> Result<(), CoreError> {
        self.start().await?;
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                self.stop().await
            }
            () = self.shutdown.cancelled() => {
                info!("app exiting after factory reset");
                Ok(())
            }
        }
    }

    /// Mirror the transport connection into the lifecycle until cancelled.
    fn watch_connection(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut connection = self.transport.connection();
        let lifecycle = self.lifecycle.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let state = if *connection.borrow_and_update() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                };
                lifecycle.set_connection_state(state);
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    changed = connection.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            lifecycle.set_connection_state(ConnectionState::Disconnected);
        });
        cancel
    }
}

/// Clears the in-progress flag when a reset ends, including on cancellation.
struct ResetGuard<'a>(&'a AtomicBool);

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Startup steps completed so far.
#[derive(Default)]
struct Started {
    transport: bool,
    components: usize,
    router: bool,
    subscribed: bool,
}

fn log_rollback(step: &str, result: Result<(), CoreError>) {
    if let Err(e) = result {
        warn!(step, error = %e, "startup rollback step failed");
    }
}

fn keep_first(first: &mut Option<CoreError>, step: &str, result: Result<(), CoreError>) {
    if let Err(e) = result {
        warn!(step, error = %e, "shutdown step failed");
        first.get_or_insert(e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

// ── Built-in routings ────────────────────────────────────────────────

/// Factory reset runs on its own task: it stops the router that is
/// delivering this very message.
fn factory_reset_routing(app: Weak<App>) -> Routing {
    Routing::new(
        handler_fn(move |_msg: Message| {
            let app = app.clone();
            async move {
                if let Some(app) = app.upgrade() {
                    info!("factory reset requested");
                    tokio::spawn(async move {
                        if let Err(e) = app.reset().await {
                            error!(error = %e, "factory reset failed");
                        }
                    });
                }
                None
            }
        }),
        vec![
            MessageVoter::topic(&factory_reset_address()),
            MessageVoter::message_type(EVT_GATEWAY_FACTORY_RESET),
        ],
    )
}

fn state_report_routing(address: &Address, lifecycle: Lifecycle) -> Routing {
    let reply_to = address.clone().with_msg_type(MSG_TYPE_EVT);
    let service = address.resource_name.clone();
    Routing::new(
        Arc::new(MessageHandler::new(processor_fn(move |_msg: Message| {
            let reply_to = reply_to.clone();
            let service = service.clone();
            let lifecycle = lifecycle.clone();
            async move {
                let state = json!({
                    "app": lifecycle.app_state(),
                    "connection": lifecycle.connection_state(),
                });
                let envelope = Envelope::new_object(EVT_APP_STATE_REPORT, &service, &state)?;
                Ok(Some(Message::new(reply_to, envelope)))
            }
        }))),
        vec![
            MessageVoter::topic(&address.clone().with_msg_type(MSG_TYPE_CMD)),
            MessageVoter::message_type(CMD_APP_GET_STATE),
        ],
    )
}

fn extended_report_routing(address: &Address, report: ExtendedReport) -> Routing {
    let reply_to = address.clone().with_msg_type(MSG_TYPE_EVT);
    let service = address.resource_name.clone();
    Routing::new(
        Arc::new(MessageHandler::new(processor_fn(move |_msg: Message| {
            let reply_to = reply_to.clone();
            let service = service.clone();
            let report = Arc::clone(&report);
            async move {
                let envelope = Envelope::new_object(EVT_CONFIG_EXTENDED_REPORT, &service, &report())?;
                Ok(Some(Message::new(reply_to, envelope)))
            }
        }))),
        vec![
            MessageVoter::topic(&address.clone().with_msg_type(MSG_TYPE_CMD)),
            MessageVoter::message_type(CMD_CONFIG_GET_EXTENDED_REPORT),
        ],
    )
}
