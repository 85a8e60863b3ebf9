//! Transport abstraction shared by the MQTT client and the in-memory
//! loopback.
//!
//! Inbound messages are fanned out to every registered channel; each
//! consumer (router, sync client) filters what it cares about.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

use crate::address::Address;
use crate::error::Error;
use crate::message::{Envelope, Message};

/// Anything that can put an envelope on the wire.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), Error>;
}

/// A full duplex transport.
#[async_trait]
pub trait Transport: Publisher {
    async fn start(&self) -> Result<(), Error>;

    async fn stop(&self) -> Result<(), Error>;

    async fn subscribe(&self, topics: &[String]) -> Result<(), Error>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), Error>;

    /// Deliver every decoded inbound message to `tx` until unregistered.
    /// Registering an existing id replaces the previous sender.
    fn register_channel(&self, id: &str, tx: mpsc::Sender<Message>);

    fn unregister_channel(&self, id: &str);

    /// `true` while the transport holds a live broker session.
    fn connection(&self) -> watch::Receiver<bool>;
}

// ── Channel fan-out ──────────────────────────────────────────────────

/// Registry of inbound consumers keyed by channel id.
#[derive(Debug, Default)]
pub(crate) struct Channels {
    senders: DashMap<String, mpsc::Sender<Message>>,
}

impl Channels {
    pub(crate) fn register(&self, id: &str, tx: mpsc::Sender<Message>) {
        self.senders.insert(id.to_owned(), tx);
    }

    pub(crate) fn unregister(&self, id: &str) {
        self.senders.remove(id);
    }

    /// Send `msg` to every channel. Senders are cloned out first so no
    /// map guard is held across the await.
    pub(crate) async fn dispatch(&self, msg: &Message) {
        let targets: Vec<(String, mpsc::Sender<Message>)> = self
            .senders
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(msg.clone()).await.is_err() {
                tracing::debug!(channel = %id, topic = %msg.topic, "channel closed, message not delivered");
            }
        }
    }
}
