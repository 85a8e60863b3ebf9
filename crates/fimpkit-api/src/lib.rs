// fimpkit-api: FIMP wire layer (topic addressing, JSON envelopes, MQTT transports)

pub mod address;
pub mod error;
pub mod memory;
pub mod message;
pub mod mqtt;
pub mod sync_client;
pub mod transport;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address::{topic_matches, Address};
pub use error::Error;
pub use memory::MemoryTransport;
pub use message::{Envelope, Message};
pub use mqtt::{MqttConfig, MqttTransport, ReconnectConfig};
pub use sync_client::SyncClient;
pub use transport::{Publisher, Transport};
pub use value::{Value, ValueType};
