//! Adapter framework on top of the FIMP wire layer in `fimpkit-api`.
//!
//! - **[`Router`]**: Worker pool draining one transport channel. Each
//!   inbound message is offered to every [`Routing`] whose voters accept
//!   it; replies go to `resp_to` or the reply's own address. Handler panics
//!   are contained per routing.
//!
//! - **[`TaskManager`]**: Periodic and one-shot [`Task`]s gated by state
//!   voters, with live interval updates by task name.
//!
//! - **Services**: [`ServiceBase`] serializes controller access and
//!   deduplicates event reports through a [`ReportingCache`]. The device
//!   families in [`services`] (binary/level switch, thermostat, media
//!   player, numeric sensors) are registered on an [`Adapter`] as
//!   [`Thing`]s and resolved by topic when commands arrive.
//!
//! - **[`Refresher`]**: Single-flight, TTL-cached, backoff-guarded wrapper
//!   around a failure-prone read.
//!
//! - **[`App`]**: Ordered startup/shutdown of transport, components,
//!   router, subscriptions and tasks; factory reset; signal handling.
//!
//! - **[`observer::Observer`]**: Mirror of the hub's device/thing/room/area
//!   catalog, announcing changes on the [`EventManager`].

pub mod adapter;
pub mod app;
pub mod cache;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod observer;
mod panic;
pub mod refresher;
pub mod router;
pub mod service;
pub mod services;
pub mod task;
pub mod voter;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{Adapter, Thing};
pub use app::{App, AppBuilder, Component, Resetter};
pub use cache::{ReportingCache, ReportingStrategy};
pub use error::{ControllerError, CoreError};
pub use event::{Event, EventFilter, EventListener, EventManager};
pub use lifecycle::{AppState, ConnectionState, Lifecycle};
pub use refresher::Refresher;
pub use router::{MessageHandler, Processor, Router, RouterConfig, Routing};
pub use service::{Service, ServiceBase, Specification};
pub use task::{Task, TaskManager};
pub use voter::{MessageVoter, SharedVoter, Voter};
