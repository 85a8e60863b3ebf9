// ── Application lifecycle ──
//
// Two orthogonal state machines (app state, connection state) held in
// watch channels. Components observe them through voters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;
use tracing::info;

use crate::voter::{voter, SharedVoter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    NotConfigured,
    Starting,
    Running,
    Terminating,
    StartupError,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Cheaply cloneable handle to the shared lifecycle state.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    app: watch::Sender<AppState>,
    connection: watch::Sender<ConnectionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                app: watch::Sender::new(AppState::NotConfigured),
                connection: watch::Sender::new(ConnectionState::Disconnected),
            }),
        }
    }

    pub fn app_state(&self) -> AppState {
        *self.inner.app.borrow()
    }

    pub fn set_app_state(&self, state: AppState) {
        let previous = self.inner.app.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "app state changed");
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = self.inner.connection.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "connection state changed");
        }
    }

    pub fn subscribe_app_state(&self) -> watch::Receiver<AppState> {
        self.inner.app.subscribe()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Voter that passes while the app is in `state`.
    pub fn app_in_state(&self, state: AppState) -> SharedVoter {
        let lifecycle = self.clone();
        voter(move || lifecycle.app_state() == state)
    }

    /// Voter that passes while connected to the broker.
    pub fn is_connected(&self) -> SharedVoter {
        let lifecycle = self.clone();
        voter(move || lifecycle.connection_state() == ConnectionState::Connected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn states_render_as_snake_case() {
        assert_eq!(AppState::StartupError.to_string(), "startup_error");
        assert_eq!("not_configured".parse::<AppState>().unwrap(), AppState::NotConfigured);
        assert_eq!(
            serde_json::to_value(ConnectionState::Connected).unwrap(),
            serde_json::json!("connected")
        );
    }

    #[test]
    fn voters_follow_state() {
        let lifecycle = Lifecycle::new();
        let running = lifecycle.app_in_state(AppState::Running);
        let connected = lifecycle.is_connected();
        assert!(!running.vote());
        assert!(!connected.vote());

        lifecycle.set_app_state(AppState::Running);
        lifecycle.set_connection_state(ConnectionState::Connected);
        assert!(running.vote());
        assert!(connected.vote());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe_app_state();
        lifecycle.set_app_state(AppState::Starting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AppState::Starting);
    }
}
