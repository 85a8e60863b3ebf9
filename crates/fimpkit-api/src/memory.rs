//! In-process loopback transport.
//!
//! Every publish goes through the real JSON codec, is recorded, and is
//! delivered back to registered channels when it matches a subscription.
//! Tests drive inbound traffic with [`MemoryTransport::inject`].

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};

use crate::address::{topic_matches, Address};
use crate::error::Error;
use crate::message::{Envelope, Message};
use crate::transport::{Channels, Publisher, Transport};

pub struct MemoryTransport {
    channels: Channels,
    subscriptions: Mutex<BTreeSet<String>>,
    published: Mutex<Vec<Message>>,
    published_notify: Notify,
    connected: watch::Sender<bool>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: Channels::default(),
            subscriptions: Mutex::new(BTreeSet::new()),
            published: Mutex::new(Vec::new()),
            published_notify: Notify::new(),
            connected: watch::Sender::new(false),
        }
    }

    /// Deliver an inbound frame as if it arrived from the broker.
    pub async fn inject(&self, address: &Address, envelope: &Envelope) -> Result<(), Error> {
        let msg = Message::from_wire(&address.to_topic(), &envelope.to_bytes()?)?;
        self.deliver(&msg).await;
        Ok(())
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<Message> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Published messages of one envelope type.
    pub fn published_of_type(&self, msg_type: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|m| m.payload.msg_type == msg_type)
            .collect()
    }

    pub fn clear_published(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Wait until at least `count` messages have been published, or the
    /// timeout elapses. Returns whatever was published either way.
    pub async fn wait_published(&self, count: usize, timeout: Duration) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.published_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let published = self.published();
            if published.len() >= count {
                return published;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.published();
            }
        }
    }

    async fn deliver(&self, msg: &Message) {
        let subscribed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|pattern| topic_matches(pattern, &msg.topic));
        if subscribed {
            self.channels.dispatch(msg).await;
        } else {
            tracing::trace!(topic = %msg.topic, "no subscription, message not delivered");
        }
    }
}

#[async_trait]
impl Publisher for MemoryTransport {
    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), Error> {
        let msg = Message::from_wire(&address.to_topic(), &envelope.to_bytes()?)?;
        tracing::debug!(topic = %msg.topic, msg_type = %msg.payload.msg_type, "publishing");

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg.clone());
        self.published_notify.notify_waiters();

        self.deliver(&msg).await;
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), Error> {
        self.connected.send_replace(true);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.connected.send_replace(false);
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Error> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(topics.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), Error> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            subscriptions.remove(topic);
        }
        Ok(())
    }

    fn register_channel(&self, id: &str, tx: mpsc::Sender<Message>) {
        self.channels.register(id, tx);
    }

    fn unregister_channel(&self, id: &str) {
        self.channels.unregister(id);
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::address::MSG_TYPE_CMD;

    fn switch_address() -> Address {
        Address::device(MSG_TYPE_CMD, "test", "1", "out_bin_switch", "2")
    }

    #[tokio::test]
    async fn inject_respects_subscriptions() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_channel("test", tx);

        let envelope = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
        transport.inject(&switch_address(), &envelope).await.unwrap();
        assert!(rx.try_recv().is_err());

        transport.subscribe(&["pt:j1/mt:cmd/#".to_owned()]).await.unwrap();
        transport.inject(&switch_address(), &envelope).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload.uid, envelope.uid);
    }

    #[tokio::test]
    async fn publish_records_and_loops_back() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_channel("test", tx);
        transport
            .subscribe(&[switch_address().to_topic()])
            .await
            .unwrap();

        let envelope = Envelope::new_bool("cmd.binary.set", "out_bin_switch", false);
        transport.publish(&switch_address(), &envelope).await.unwrap();

        assert_eq!(transport.published_of_type("cmd.binary.set").len(), 1);
        assert!(!rx.recv().await.unwrap().payload.bool_value().unwrap());
    }

    #[tokio::test]
    async fn unregistered_channel_receives_nothing() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_channel("test", tx);
        transport.unregister_channel("test");
        transport.subscribe(&["#".to_owned()]).await.unwrap();

        let envelope = Envelope::new_null("cmd.binary.get_report", "out_bin_switch");
        transport.inject(&switch_address(), &envelope).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_published_times_out() {
        let transport = MemoryTransport::new();
        let published = transport.wait_published(1, Duration::from_millis(50)).await;
        assert!(published.is_empty());
    }

    #[tokio::test]
    async fn connection_follows_start_and_stop() {
        let transport = MemoryTransport::new();
        let rx = transport.connection();
        transport.start().await.unwrap();
        assert!(*rx.borrow());
        transport.stop().await.unwrap();
        assert!(!*rx.borrow());
    }
}
