//! MQTT transport built on `rumqttc`.
//!
//! A background task drives the rumqttc event loop: it decodes inbound
//! publishes, fans them out to registered channels, resubscribes every
//! tracked topic after each `ConnAck`, and reconnects with exponential
//! backoff after connection errors.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::address::Address;
use crate::error::Error;
use crate::message::{Envelope, Message};
use crate::transport::{Channels, Publisher, Transport};

const DEFAULT_PORT: u16 = 1883;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for broker reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── MqttConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URI, `tcp://host:port` or `mqtt://host:port`.
    pub uri: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    /// Capacity of the rumqttc request queue.
    pub request_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            uri: "tcp://localhost:1883".into(),
            client_id: "fimpkit".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            request_capacity: 64,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MqttConfig {
    fn options(&self) -> Result<MqttOptions, Error> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: self.uri.clone(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(&self.uri).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "tcp" | "mqtt") {
            return Err(invalid("scheme must be tcp or mqtt"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        if let Some(username) = &self.username {
            let password = self
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            options.set_credentials(username.clone(), password);
        }
        Ok(options)
    }
}

// ── MqttTransport ────────────────────────────────────────────────────

struct Running {
    client: AsyncClient,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// MQTT transport. Construct, register channels, then `start()`.
pub struct MqttTransport {
    config: MqttConfig,
    channels: Arc<Channels>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    connected: Arc<watch::Sender<bool>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            channels: Arc::new(Channels::default()),
            topics: Arc::new(Mutex::new(BTreeSet::new())),
            connected: Arc::new(watch::Sender::new(false)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    async fn client(&self) -> Result<AsyncClient, Error> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.client.clone())
            .ok_or(Error::NotStarted)
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), Error> {
        let topic = address.to_topic();
        let payload = envelope.to_bytes()?;
        let client = self.client().await?;

        tracing::debug!(topic = %topic, msg_type = %envelope.msg_type, "publishing");
        client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Publish {
                topic,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn start(&self) -> Result<(), Error> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("MQTT transport already started");
            return Ok(());
        }

        let options = self.config.options()?;
        let (client, eventloop) = AsyncClient::new(options, self.config.request_capacity);
        let cancel = CancellationToken::new();

        tracing::info!(uri = %self.config.uri, client_id = %self.config.client_id, "starting MQTT transport");

        let handle = tokio::spawn(event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&self.channels),
            Arc::clone(&self.topics),
            Arc::clone(&self.connected),
            self.config.reconnect.clone(),
            cancel.clone(),
        ));

        *running = Some(Running {
            client,
            cancel,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        let Some(running) = self.running.lock().await.take() else {
            tracing::debug!("MQTT transport not running");
            return Ok(());
        };

        if let Err(e) = running.client.try_disconnect() {
            tracing::debug!(error = %e, "disconnect request not queued");
        }
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::warn!(error = %e, "MQTT event loop task failed");
        }
        self.connected.send_replace(false);
        tracing::info!("MQTT transport stopped");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Error> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(topics.iter().cloned());

        // Before start, topics are only tracked and go out on ConnAck.
        let Ok(client) = self.client().await else {
            return Ok(());
        };
        for topic in topics {
            tracing::debug!(topic = %topic, "subscribing");
            client.subscribe(topic.clone(), QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), Error> {
        {
            let mut tracked = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            for topic in topics {
                tracked.remove(topic);
            }
        }

        let Ok(client) = self.client().await else {
            return Ok(());
        };
        for topic in topics {
            tracing::debug!(topic = %topic, "unsubscribing");
            client.unsubscribe(topic.clone()).await?;
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

// ── Background event loop ────────────────────────────────────────────

/// Poll → dispatch; on error, backoff → poll again (rumqttc reconnects
/// on the next poll).
async fn event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    channels: Arc<Channels>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    connected: Arc<watch::Sender<bool>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("MQTT connected");
                    attempt = 0;
                    connected.send_replace(true);
                    resubscribe(&client, &topics);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match Message::from_wire(&publish.topic, &publish.payload) {
                        Ok(msg) => channels.dispatch(&msg).await,
                        Err(e) => {
                            tracing::warn!(topic = %publish.topic, error = %e, "dropping undecodable message");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    connected.send_replace(false);
                    let delay = calculate_backoff(attempt, &reconnect);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "MQTT connection error, reconnecting"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    connected.send_replace(false);
    tracing::debug!("MQTT event loop exiting");
}

/// Queue subscriptions without awaiting: the event loop that drains the
/// request queue is the caller.
fn resubscribe(client: &AsyncClient, topics: &Mutex<BTreeSet<String>>) {
    let topics: Vec<String> = topics
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
            tracing::warn!(topic = %topic, error = %e, "resubscribe failed");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `delay = min(initial * 2^attempt, max)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(16));
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}
