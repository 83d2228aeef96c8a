//! Realtime transport layer: connection state, retry policy, and the
//! transport seam the session facade is built on.

mod reconnect;
mod transport;

pub use reconnect::ReconnectController;
pub use transport::WsTransport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pawcare_shared::{ChatError, ClientCommand, ServerEvent};

/// Connection state for the realtime channel. Owned by the
/// [`ReconnectController`]; everyone else reads it through a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    /// `Failed` is terminal until an explicit reset.
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }
}

/// Configuration for auto-reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry `attempt` (0-based): doubles each attempt,
    /// capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Event pushed by the transport to whoever holds the receiving end of
/// its channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded server event arrived on the socket.
    Event(ServerEvent),
    /// The socket closed or errored out.
    Closed { reason: String },
}

/// Sender half handed to a transport at construction.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// The only component that speaks to the network.
///
/// Implementations own at most one underlying socket at a time; a
/// `connect` while connected first tears the old socket down.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection authenticated by `token`. `Ok(false)` means a
    /// network-level failure (retryable); errors are reserved for
    /// rejected credentials and bad arguments.
    async fn connect(&self, token: &str) -> Result<bool, ChatError>;

    /// Queue one outbound command. Returns `false` when no socket is up;
    /// a `true` result is not a delivery guarantee.
    async fn send(&self, command: ClientCommand) -> bool;

    /// Tear down the current socket, if any. Idempotent.
    async fn disconnect(&self);
}
