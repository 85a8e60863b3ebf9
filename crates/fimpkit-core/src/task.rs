// ── Periodic task manager ──
//
// Named fixed-interval jobs. Each task runs once at start, then on every
// tick of its interval (an interval of zero means run once). State voters
// gate each run; a panicking handler is logged and the ticker continues.

use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

use crate::error::CoreError;
use crate::panic::panic_message;
use crate::voter::SharedVoter;

/// Name given to tasks built without one. Interval updates ignore it.
pub const ANONYMOUS_TASK: &str = "anonymous";

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ── Task ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Task {
    name: String,
    handler: TaskFn,
    interval: Duration,
    voters: Vec<SharedVoter>,
}

impl Task {
    /// Recurring task. `Duration::ZERO` makes it one-shot.
    pub fn new<F, Fut>(handler: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: ANONYMOUS_TASK.to_owned(),
            handler: Arc::new(move || handler().boxed()),
            interval,
            voters: Vec::new(),
        }
    }

    /// Task that runs exactly once when the manager starts.
    pub fn one_shot<F, Fut>(handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(handler, Duration::ZERO)
    }

    pub fn named(mut self, name: &str) -> Self {
        name.clone_into(&mut self.name);
        self
    }

    pub fn with_voter(mut self, voter: SharedVoter) -> Self {
        self.voters.push(voter);
        self
    }

    pub fn with_voters(mut self, voters: impl IntoIterator<Item = SharedVoter>) -> Self {
        self.voters.extend(voters);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("voters", &self.voters.len())
            .finish_non_exhaustive()
    }
}

// ── TaskManager ──────────────────────────────────────────────────────

struct TaskEntry {
    task: Task,
    cancel: Option<CancellationToken>,
}

struct ManagerState {
    entries: Vec<TaskEntry>,
    running: bool,
}

pub struct TaskManager {
    state: Mutex<ManagerState>,
    tracker: TaskTracker,
}

impl TaskManager {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                entries: tasks
                    .into_iter()
                    .map(|task| TaskEntry { task, cancel: None })
                    .collect(),
                running: false,
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Add a task; it starts immediately if the manager is running.
    pub async fn add_task(&self, task: Task) {
        let mut state = self.state.lock().await;
        let cancel = state.running.then(|| self.spawn(task.clone()));
        state.entries.push(TaskEntry { task, cancel });
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(CoreError::AlreadyRunning {
                component: "task manager",
            });
        }

        for entry in &mut state.entries {
            entry.cancel = Some(self.spawn(entry.task.clone()));
        }
        state.running = true;
        info!(tasks = state.entries.len(), "task manager started");
        Ok(())
    }

    /// Signal every task and wait for the loops to exit. Running
    /// handlers finish first. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().await;
            if !state.running {
                debug!("task manager already stopped");
                return Ok(());
            }
            for entry in &mut state.entries {
                if let Some(cancel) = entry.cancel.take() {
                    cancel.cancel();
                }
            }
            state.running = false;
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        info!("task manager stopped");
        Ok(())
    }

    /// Change the interval of every task called `name` and restart it,
    /// which runs it once immediately. Returns whether any task matched.
    pub async fn update_task_interval(&self, name: &str, interval: Duration) -> bool {
        if name == ANONYMOUS_TASK {
            return false;
        }

        let mut state = self.state.lock().await;
        let running = state.running;
        let mut found = false;
        for entry in state.entries.iter_mut().filter(|e| e.task.name == name) {
            found = true;
            entry.task.interval = interval;
            if let Some(cancel) = entry.cancel.take() {
                cancel.cancel();
            }
            if running {
                entry.cancel = Some(self.spawn(entry.task.clone()));
            }
        }

        if found {
            info!(task = %name, interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "task interval updated");
        }
        found
    }

    fn spawn(&self, task: Task) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.tracker.spawn(run_task(task, cancel.clone()));
        cancel
    }
}

// ── Task loop ────────────────────────────────────────────────────────

async fn run_task(task: Task, cancel: CancellationToken) {
    execute(&task).await;
    if task.interval.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => execute(&task).await,
        }
    }
    trace!(task = %task.name, "task loop exiting");
}

async fn execute(task: &Task) {
    let run = async {
        if !task.voters.iter().all(|v| v.vote()) {
            trace!(task = %task.name, "skipped by voter");
            return;
        }
        (task.handler)().await;
    };

    if let Err(payload) = AssertUnwindSafe(run).catch_unwind().await {
        error!(
            task = %task.name,
            panic = %panic_message(payload.as_ref()),
            backtrace = %Backtrace::force_capture(),
            "task panicked"
        );
    }
}
