// ── In-process event bus ──
//
// Internal notifications between components (observer updates, device
// inclusion, ...) fanned out over a broadcast channel. Payloads are typed
// per publisher and recovered by downcasting.

use std::any::Any;
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

const EVENT_CHANNEL_SIZE: usize = 256;

pub struct Event {
    pub domain: String,
    pub class: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Event {
    pub fn new<T: Any + Send + Sync>(domain: &str, class: &str, payload: T) -> Self {
        Self {
            domain: domain.to_owned(),
            class: class.to_owned(),
            payload: Arc::new(payload),
        }
    }

    /// Typed payload, if it is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("domain", &self.domain)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

/// Filter predicate for event listeners.
pub enum EventFilter {
    All,
    Domain(String),
    Class(String),
    And(Vec<EventFilter>),
    Custom(Box<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn domain(domain: &str) -> Self {
        Self::Domain(domain.to_owned())
    }

    pub fn class(class: &str) -> Self {
        Self::Class(class.to_owned())
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Domain(domain) => event.domain == *domain,
            Self::Class(class) => event.class == *class,
            Self::And(filters) => filters.iter().all(|f| f.matches(event)),
            Self::Custom(f) => f(event),
        }
    }
}

// ── EventManager ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventManager {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    /// Deliver to every current listener. Returns the number of listeners;
    /// zero is not an error.
    pub fn publish(&self, event: Event) -> usize {
        debug!(domain = %event.domain, class = %event.class, "publishing event");
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventListener {
        EventListener {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ── EventListener ────────────────────────────────────────────────────

pub struct EventListener {
    rx: broadcast::Receiver<Arc<Event>>,
    filter: EventFilter,
}

impl EventListener {
    /// Next matching event. Lagging skips the lost events and keeps going;
    /// `None` once the manager is dropped.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` of matching events.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send + Unpin {
        let filter = self.filter;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(event) if filter.matches(&event) => Some(event),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "event stream lagged");
                None
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Included(u32);

    #[tokio::test]
    async fn listener_skips_non_matching_events() {
        let events = EventManager::new();
        let mut listener = events.subscribe(EventFilter::domain("prime"));

        events.publish(Event::new("adapter", "included", Included(1)));
        events.publish(Event::new("prime", "device", Included(2)));

        let event = listener.recv().await.unwrap();
        assert_eq!(event.class, "device");
        assert_eq!(event.payload::<Included>(), Some(&Included(2)));
        assert!(event.payload::<String>().is_none());
    }

    #[tokio::test]
    async fn and_filter_requires_every_part() {
        let events = EventManager::new();
        let mut listener = events.subscribe(EventFilter::And(vec![
            EventFilter::domain("prime"),
            EventFilter::class("room"),
        ]));

        events.publish(Event::new("prime", "device", ()));
        events.publish(Event::new("prime", "room", ()));

        assert_eq!(listener.recv().await.unwrap().class, "room");
    }

    #[tokio::test]
    async fn stream_yields_matching_events() {
        let events = EventManager::new();
        let mut stream = events
            .subscribe(EventFilter::Custom(Box::new(|e| e.class.starts_with('t'))))
            .into_stream();

        events.publish(Event::new("prime", "device", ()));
        events.publish(Event::new("prime", "thing", ()));
        drop(events);

        assert_eq!(stream.next().await.unwrap().class, "thing");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn publish_without_listeners_is_fine() {
        let events = EventManager::new();
        assert_eq!(events.publish(Event::new("prime", "device", ())), 0);
        assert_eq!(events.listener_count(), 0);
    }
}
