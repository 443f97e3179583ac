use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Consuming,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Consuming => "consuming",
            ConnectionState::Degraded => "degraded",
        }
    }
}

/// Shared view of the consumer's broker connection. The supervisor owns the
/// transitions; the HTTP surface reads the state and may request a manual
/// reconnect that short-circuits the backoff wait.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<Mutex<ConnectionState>>,
    refresh: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            refresh: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Manual override: wake the supervisor immediately. If nothing is
    /// waiting yet, the request is kept until the next wait point.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub async fn refresh_requested(&self) {
        self.refresh.notified().await;
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn refresh_request_is_buffered_until_awaited() {
        let handle = ConnectionHandle::new();
        handle.request_refresh();

        // The permit survives until a waiter shows up.
        timeout(Duration::from_millis(100), handle.refresh_requested())
            .await
            .expect("buffered refresh should resolve immediately");
    }

    #[test]
    fn state_round_trip() {
        let handle = ConnectionHandle::new();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        handle.set(ConnectionState::Consuming);
        assert_eq!(handle.state(), ConnectionState::Consuming);
        assert_eq!(handle.state().as_str(), "consuming");
    }
}
