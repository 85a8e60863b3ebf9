// ── Prime observer ──
//
// In-memory mirror of the hub's component catalog (devices, things, rooms,
// areas). Kept current by `evt.pd7.notify` notifications, refreshed lazily
// when a getter finds the snapshot stale, and periodically by a task.
// Every applied change is announced on the event manager in domain `prime`.

mod loader;
mod model;

pub use loader::{Loader, PrimeLoader, CMD_PD7_REQUEST, EVT_PD7_RESPONSE, VINCULUM};
pub use model::{Area, CatalogEntry, ClientName, ComponentKind, Device, Room, Snapshot, Thing};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use fimpkit_api::address::MSG_TYPE_EVT;
use fimpkit_api::{Address, Message};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use strum::{Display, EnumString};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::event::{Event, EventFilter, EventManager};
use crate::router::{processor_fn, MessageHandler, Routing};
use crate::task::Task;
use crate::voter::MessageVoter;

pub const EVT_PD7_NOTIFY: &str = "evt.pd7.notify";
/// Event domain for observer notifications.
pub const PRIME_DOMAIN: &str = "prime";
/// Event class for a completed full refresh.
pub const REFRESH_CLASS: &str = "refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PrimeCommand {
    Add,
    Edit,
    Delete,
    Refresh,
}

/// Payload of every event published in domain `prime`. The event class is
/// the component name, or `refresh` for a full reload.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimeEvent {
    pub command: PrimeCommand,
    pub component: Option<ComponentKind>,
    pub id: Option<i64>,
}

impl PrimeEvent {
    /// Listener filter for changes to one component set.
    pub fn filter(component: ComponentKind) -> EventFilter {
        EventFilter::And(vec![
            EventFilter::domain(PRIME_DOMAIN),
            EventFilter::class(component.as_str()),
        ])
    }
}

/// `evt.pd7.notify` value.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub cmd: String,
    pub component: Option<String>,
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub param: Option<JsonValue>,
}

impl Notification {
    /// Ids arrive as numbers or numeric strings depending on the sender.
    fn id(&self) -> Option<i64> {
        match self.id.as_ref()? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

// ── Observer ─────────────────────────────────────────────────────────

pub struct Observer {
    loader: Arc<dyn Loader>,
    events: EventManager,
    components: Vec<ComponentKind>,
    refresh_interval: Duration,
    snapshot: ArcSwap<Snapshot>,
    refreshed_at: Mutex<Option<Instant>>,
    needs_refresh: AtomicBool,
    /// Bumped by every applied notification.
    revision: AtomicU64,
    /// Serializes writers of `snapshot`; readers never take it.
    write_lock: Mutex<()>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Observer {
    pub fn new(loader: Arc<dyn Loader>, events: EventManager, refresh_interval: Duration) -> Self {
        Self {
            loader,
            events,
            components: ComponentKind::ALL.to_vec(),
            refresh_interval,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            refreshed_at: Mutex::new(None),
            needs_refresh: AtomicBool::new(true),
            revision: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Restrict the loaded component sets.
    pub fn with_components(mut self, components: &[ComponentKind]) -> Self {
        self.components = components.to_vec();
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Whether the next getter will reload.
    pub fn is_stale(&self) -> bool {
        if self.needs_refresh.load(Ordering::SeqCst) {
            return true;
        }
        self.refreshed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none_or(|at| at.elapsed() >= self.refresh_interval)
    }

    /// Reload every component set now. Notifications that land while the
    /// load is in flight leave the snapshot stale.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let _refreshing = self.refresh_lock.lock().await;
        let revision = self.revision.load(Ordering::SeqCst);
        self.needs_refresh.store(false, Ordering::SeqCst);
        let snapshot = match self.loader.load(&self.components).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.needs_refresh.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!(
            devices = snapshot.devices.len(),
            things = snapshot.things.len(),
            rooms = snapshot.rooms.len(),
            areas = snapshot.areas.len(),
            "prime snapshot refreshed"
        );
        {
            let _writing = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.snapshot.store(Arc::new(snapshot));
            if self.revision.load(Ordering::SeqCst) != revision {
                debug!("prime changed during refresh, reloading on next read");
                self.needs_refresh.store(true, Ordering::SeqCst);
            }
        }
        *self
            .refreshed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        self.events.publish(Event::new(
            PRIME_DOMAIN,
            REFRESH_CLASS,
            PrimeEvent {
                command: PrimeCommand::Refresh,
                component: None,
                id: None,
            },
        ));
        Ok(())
    }

    /// Current snapshot, reloading first when stale. A failed reload is
    /// logged and the previous snapshot served.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        if self.is_stale() {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "prime refresh failed, serving previous snapshot");
            }
        }
        self.snapshot.load_full()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.snapshot().await.devices.clone()
    }

    pub async fn things(&self) -> Vec<Thing> {
        self.snapshot().await.things.clone()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.snapshot().await.rooms.clone()
    }

    pub async fn areas(&self) -> Vec<Area> {
        self.snapshot().await.areas.clone()
    }

    pub async fn device(&self, id: i64) -> Option<Device> {
        self.snapshot().await.devices.iter().find(|d| d.id == id).cloned()
    }

    pub async fn room(&self, id: i64) -> Option<Room> {
        self.snapshot().await.rooms.iter().find(|r| r.id == id).cloned()
    }

    // ── Notifications ────────────────────────────────────────────────

    /// Apply one notification to the snapshot. Failures flag the snapshot
    /// for a full reload on the next read.
    pub fn apply(&self, notification: &Notification) -> Result<(), CoreError> {
        let outcome = self.apply_inner(notification);
        if let Err(e) = &outcome {
            warn!(cmd = %notification.cmd, error = %e, "failed to apply prime notification");
            self.needs_refresh.store(true, Ordering::SeqCst);
        }
        outcome
    }

    fn apply_inner(&self, notification: &Notification) -> Result<(), CoreError> {
        let Ok(command) = notification.cmd.parse::<PrimeCommand>() else {
            debug!(cmd = %notification.cmd, "ignoring prime command");
            return Ok(());
        };
        if command == PrimeCommand::Refresh {
            return Ok(());
        }
        let Some(component) = notification
            .component
            .as_deref()
            .and_then(|c| c.parse::<ComponentKind>().ok())
        else {
            debug!(component = ?notification.component, "ignoring prime component");
            return Ok(());
        };

        let _writing = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = Snapshot::clone(&self.snapshot.load());
        let changed = match component {
            ComponentKind::Device => mutate(&mut snapshot.devices, command, notification)?,
            ComponentKind::Thing => mutate(&mut snapshot.things, command, notification)?,
            ComponentKind::Room => mutate(&mut snapshot.rooms, command, notification)?,
            ComponentKind::Area => mutate(&mut snapshot.areas, command, notification)?,
        };
        let Some(id) = changed else {
            return Ok(());
        };
        self.snapshot.store(Arc::new(snapshot));
        self.revision.fetch_add(1, Ordering::SeqCst);

        debug!(%command, %component, id, "prime snapshot updated");
        self.events.publish(Event::new(
            PRIME_DOMAIN,
            component.as_str(),
            PrimeEvent {
                command,
                component: Some(component),
                id: Some(id),
            },
        ));
        Ok(())
    }

    /// Routing for `evt.pd7.notify`. Errors are logged, never answered.
    pub fn routing(self: &Arc<Self>) -> Routing {
        let observer = Arc::clone(self);
        let processor = processor_fn(move |msg: Message| {
            let observer = Arc::clone(&observer);
            async move {
                let notification = match msg.payload.object_into::<Notification>() {
                    Ok(notification) => notification,
                    Err(e) => {
                        observer.needs_refresh.store(true, Ordering::SeqCst);
                        return Err(e.into());
                    }
                };
                observer.apply(&notification)?;
                Ok(None)
            }
        });
        Routing::new(
            Arc::new(MessageHandler::new(processor).silent()),
            vec![
                MessageVoter::topic(&Self::notify_address()),
                MessageVoter::message_type(EVT_PD7_NOTIFY),
            ],
        )
    }

    /// `pt:j1/mt:evt/rt:app/rn:vinculum/ad:1`
    pub fn notify_address() -> Address {
        Address::app(MSG_TYPE_EVT, VINCULUM, "1")
    }

    /// Periodic full reload at the configured interval.
    pub fn refresh_task(self: &Arc<Self>) -> Task {
        let observer = Arc::clone(self);
        Task::new(
            move || {
                let observer = Arc::clone(&observer);
                async move {
                    if let Err(e) = observer.refresh().await {
                        warn!(error = %e, "periodic prime refresh failed");
                    }
                }
            },
            self.refresh_interval,
        )
        .named("prime_refresh")
    }
}

/// Add/edit/delete `T` in `list`. Returns the affected id, or `None` when
/// the notification changed nothing.
fn mutate<T: CatalogEntry>(
    list: &mut Vec<T>,
    command: PrimeCommand,
    notification: &Notification,
) -> Result<Option<i64>, CoreError> {
    match command {
        PrimeCommand::Add | PrimeCommand::Edit => {
            let param = notification.param.clone().ok_or_else(|| {
                CoreError::Prime(format!("{} {command} without param", T::KIND))
            })?;
            let item: T = serde_json::from_value(param)?;
            let id = item.id();
            match list.iter().position(|existing| existing.id() == id) {
                Some(_) if command == PrimeCommand::Add => return Ok(None),
                Some(index) => {
                    if let Some(slot) = list.get_mut(index) {
                        *slot = item;
                    }
                }
                None => list.push(item),
            }
            Ok(Some(id))
        }
        PrimeCommand::Delete => {
            let id = notification
                .id()
                .or_else(|| {
                    notification
                        .param
                        .as_ref()
                        .and_then(|p| p.get("id"))
                        .and_then(JsonValue::as_i64)
                })
                .ok_or_else(|| CoreError::Prime(format!("{} delete without id", T::KIND)))?;
            Ok(list
                .iter()
                .position(|existing| existing.id() == id)
                .map(|index| {
                    list.swap_remove(index);
                    id
                }))
        }
        PrimeCommand::Refresh => Ok(None),
    }
}
