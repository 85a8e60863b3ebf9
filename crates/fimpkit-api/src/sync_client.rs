//! Request/response over an asynchronous transport.
//!
//! A request is published with `resp_to` pointing at the caller's
//! response topic; the first inbound message whose `corid` equals the
//! request `uid` completes the exchange.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::address::Address;
use crate::error::Error;
use crate::message::{Envelope, Message};
use crate::transport::Transport;

const RESPONSE_BUFFER: usize = 16;

pub struct SyncClient {
    transport: Arc<dyn Transport>,
    /// Response topics already subscribed; kept for the client lifetime
    /// since other consumers may share them.
    subscribed: Mutex<HashSet<String>>,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Publish `request` to `address` and wait for the correlated reply on
    /// `response`.
    pub async fn request(
        &self,
        address: &Address,
        request: Envelope,
        response: &Address,
        timeout: Duration,
    ) -> Result<Message, Error> {
        let response_topic = response.to_topic();
        self.ensure_subscribed(&response_topic).await?;

        let channel_id = format!("sync-client-{}", Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(RESPONSE_BUFFER);
        self.transport.register_channel(&channel_id, tx);

        let request = request.with_response_to(&response_topic);
        let uid = request.uid.clone();

        let exchange = async {
            self.transport.publish(address, &request).await?;
            while let Some(msg) = rx.recv().await {
                if msg.payload.correlation_id == uid {
                    return Ok(msg);
                }
            }
            Err(Error::NotStarted)
        };

        let outcome = tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    topic: address.to_topic(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });

        self.transport.unregister_channel(&channel_id);
        outcome
    }

    async fn ensure_subscribed(&self, topic: &str) -> Result<(), Error> {
        let mut subscribed = self.subscribed.lock().await;
        if !subscribed.contains(topic) {
            self.transport.subscribe(&[topic.to_owned()]).await?;
            subscribed.insert(topic.to_owned());
        }
        Ok(())
    }
}
