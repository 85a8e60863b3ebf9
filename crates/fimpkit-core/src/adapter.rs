// ── Service registry ──
//
// Things (groups of services sharing an inclusion address) registered by
// the host. Command handlers resolve their target service here by topic.

use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fimpkit_api::address::{MSG_TYPE_CMD, MSG_TYPE_EVT};
use fimpkit_api::Address;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::service::Service;
use crate::voter::{voter, SharedVoter};

// ── Thing ────────────────────────────────────────────────────────────

/// Services exposed by one physical device.
pub struct Thing {
    inclusion_address: String,
    services: Vec<Arc<dyn Service>>,
}

impl Thing {
    pub fn new(inclusion_address: &str, services: Vec<Arc<dyn Service>>) -> Self {
        Self {
            inclusion_address: inclusion_address.to_owned(),
            services,
        }
    }

    pub fn inclusion_address(&self) -> &str {
        &self.inclusion_address
    }

    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.services
    }

    /// Service by name and service address.
    pub fn service(&self, name: &str, service_address: &str) -> Option<Arc<dyn Service>> {
        self.services
            .iter()
            .find(|s| {
                s.name() == name && s.specification().address.service_address == service_address
            })
            .cloned()
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("inclusion_address", &self.inclusion_address)
            .field(
                "services",
                &self.services.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ── Adapter ──────────────────────────────────────────────────────────

pub struct Adapter {
    name: String,
    address: String,
    things: DashMap<String, Arc<Thing>>,
    initialized: Arc<AtomicBool>,
}

impl Adapter {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_owned(),
            address: address.to_owned(),
            things: DashMap::new(),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resource name used in device topics (`rn:<name>`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Adapter-level address, e.g. `pt:j1/mt:evt/rt:ad/rn:<name>/ad:<address>`.
    pub fn adapter_address(&self, msg_type: &str) -> Address {
        Address::adapter(msg_type, &self.name, &self.address)
    }

    /// Subscription pattern for commands to `service` on any thing of
    /// this adapter. An empty service name matches every service.
    pub fn command_pattern(&self, service: &str) -> Address {
        Address::device(MSG_TYPE_CMD, &self.name, "", service, "")
    }

    /// Pattern for events from `service` on any thing of this adapter.
    pub fn event_pattern(&self, service: &str) -> Address {
        Address::device(MSG_TYPE_EVT, &self.name, "", service, "")
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a thing, replacing any previous one at the same address.
    pub fn register_thing(&self, thing: Thing) {
        info!(
            adapter = %self.name,
            address = %thing.inclusion_address,
            services = thing.services.len(),
            "thing registered"
        );
        self.things
            .insert(thing.inclusion_address.clone(), Arc::new(thing));
    }

    pub fn unregister_thing(&self, inclusion_address: &str) -> Option<Arc<Thing>> {
        let removed = self.things.remove(inclusion_address).map(|(_, t)| t);
        if removed.is_some() {
            info!(adapter = %self.name, address = %inclusion_address, "thing unregistered");
        }
        removed
    }

    pub fn thing_by_address(&self, inclusion_address: &str) -> Option<Arc<Thing>> {
        self.things.get(inclusion_address).map(|t| Arc::clone(&t))
    }

    /// All things, ordered by inclusion address.
    pub fn things(&self) -> Vec<Arc<Thing>> {
        let mut things: Vec<Arc<Thing>> = self.things.iter().map(|t| Arc::clone(&t)).collect();
        things.sort_by(|a, b| a.inclusion_address.cmp(&b.inclusion_address));
        things
    }

    pub fn clear(&self) {
        self.things.clear();
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Services named `name` across all things; every service when `name`
    /// is empty.
    pub fn services(&self, name: &str) -> Vec<Arc<dyn Service>> {
        self.things()
            .iter()
            .flat_map(|thing| thing.services.iter())
            .filter(|s| name.is_empty() || s.name() == name)
            .cloned()
            .collect()
    }

    /// Thing by resource address, then service by name + service address.
    pub fn service_by_address(&self, address: &Address) -> Option<Arc<dyn Service>> {
        self.thing_by_address(&address.resource_address)?
            .service(&address.service_name, &address.service_address)
    }

    pub fn find_service(&self, topic: &str) -> Result<Arc<dyn Service>, CoreError> {
        let address = Address::parse(topic)?;
        self.service_by_address(&address).ok_or_else(|| {
            debug!(topic = %topic, "no service registered at topic");
            CoreError::ServiceNotFound {
                topic: topic.to_owned(),
            }
        })
    }

    /// Resolve the service at `topic` as concrete type `S`.
    pub fn service_by_topic<S: Service>(&self, topic: &str) -> Result<Arc<S>, CoreError> {
        self.find_service(topic)?
            .as_any()
            .downcast::<S>()
            .map_err(|_| CoreError::IncompatibleService {
                topic: topic.to_owned(),
                expected: short_type_name::<S>().to_owned(),
            })
    }

    // ── Readiness ────────────────────────────────────────────────────

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
        if initialized {
            info!(adapter = %self.name, things = self.things.len(), "adapter initialized");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Voter that holds periodic tasks back until initial load completes.
    pub fn initialized_voter(&self) -> SharedVoter {
        let initialized = Arc::clone(&self.initialized);
        voter(move || initialized.load(Ordering::SeqCst))
    }

    /// Voter that skips a reporting task while no enabled service whose
    /// name starts with `prefix` is registered.
    pub fn services_voter(self: &Arc<Self>, prefix: &str) -> SharedVoter {
        let adapter = Arc::downgrade(self);
        let prefix = prefix.to_owned();
        voter(move || {
            adapter.upgrade().is_some_and(|adapter| {
                adapter.things.iter().any(|thing| {
                    thing
                        .services
                        .iter()
                        .any(|s| s.specification().enabled && s.name().starts_with(&prefix))
                })
            })
        })
    }
}

fn short_type_name<S>() -> &'static str {
    let full = type_name::<S>();
    full.rsplit("::").next().unwrap_or(full)
}
