//! Bounded-backoff reconnection on top of the transport seam.
//!
//! One background run loop per connection drives the whole lifecycle:
//! attempt, pump events while the socket is up, back off, retry. The
//! loop is the only place a retry timer can exist, so cancelling it
//! (disconnect, reset, drop) structurally cancels any pending retry.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use pawcare_shared::{ChatError, ServerEvent};

use super::{ConnectionState, ReconnectConfig, Transport, TransportEvent};
use crate::events::{ChatEvent, ChatEvents};

type ServerEventHandler = Box<dyn Fn(ServerEvent) + Send + Sync>;

/// Drives retry policy for one transport and owns the connection state.
pub struct ReconnectController {
    inner: Arc<Inner>,
    run: parking_lot::Mutex<Option<JoinHandle<()>>>,
    token: parking_lot::Mutex<Option<String>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    events: ChatEvents,
    on_server_event: ServerEventHandler,
    transport_events: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl ReconnectController {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
        events: ChatEvents,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        on_server_event: impl Fn(ServerEvent) + Send + Sync + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                events,
                on_server_event: Box::new(on_server_event),
                transport_events: tokio::sync::Mutex::new(transport_events),
            }),
            run: parking_lot::Mutex::new(None),
            token: parking_lot::Mutex::new(None),
        }
    }

    /// Start the connection lifecycle and resolve with the outcome of the
    /// initial attempt; retries keep running in the background.
    ///
    /// A no-op when already connected.
    pub async fn connect(&self, token: &str) -> Result<bool, ChatError> {
        if self.state().is_connected() {
            return Ok(true);
        }
        *self.token.lock() = Some(token.to_string());
        self.launch(token.to_string()).await
    }

    /// User-triggered retry from `Failed`: clears the attempt count and
    /// reconnects immediately, bypassing backoff.
    pub async fn reset(&self) -> Result<bool, ChatError> {
        let token = self
            .token
            .lock()
            .clone()
            .ok_or_else(|| ChatError::Validation("reset before any connect".to_string()))?;
        self.launch(token).await
    }

    /// Abort the run loop (cancelling any pending retry) and tear the
    /// transport down. Idempotent.
    pub async fn disconnect(&self) {
        self.stop_run_loop();
        self.inner.transport.disconnect().await;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    async fn launch(&self, token: String) -> Result<bool, ChatError> {
        self.stop_run_loop();
        let (initial_tx, initial_rx) = oneshot::channel();
        let handle = tokio::spawn(run(self.inner.clone(), token, initial_tx));
        *self.run.lock() = Some(handle);
        initial_rx
            .await
            .map_err(|_| ChatError::Transport("connection task aborted".to_string()))?
    }

    fn stop_run_loop(&self) {
        if let Some(handle) = self.run.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ReconnectController {
    fn drop(&mut self) {
        // A reconnect loop must never outlive its owner.
        self.stop_run_loop();
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        if *self.state.borrow() == next {
            return;
        }
        self.state.send_replace(next.clone());
        self.events.emit(ChatEvent::StateChanged(next));
    }

    /// Throw away events left over from a previous socket so a stale
    /// `Closed` cannot kill a fresh connection.
    async fn drain_stale_events(&self) {
        let mut rx = self.transport_events.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Forward server events until the socket reports closure. Returns
    /// the close reason.
    async fn pump_events(&self) -> String {
        let mut rx = self.transport_events.lock().await;
        loop {
            match rx.recv().await {
                Some(TransportEvent::Event(event)) => (self.on_server_event)(event),
                Some(TransportEvent::Closed { reason }) => return reason,
                None => return "transport event channel closed".to_string(),
            }
        }
    }
}

async fn run(inner: Arc<Inner>, token: String, initial: oneshot::Sender<Result<bool, ChatError>>) {
    let mut initial = Some(initial);
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    inner.set_state(ConnectionState::Connecting);

    loop {
        inner.drain_stale_events().await;

        match inner.transport.connect(&token).await {
            Ok(true) => {
                let resumed = ever_connected || attempt > 0;
                ever_connected = true;
                attempt = 0;
                inner.set_state(ConnectionState::Connected);
                if resumed {
                    inner.events.emit(ChatEvent::Reconnected);
                }
                if let Some(tx) = initial.take() {
                    let _ = tx.send(Ok(true));
                }

                let reason = inner.pump_events().await;
                tracing::warn!("connection lost: {}", reason);
                // Make sends report failure during the backoff gap
                // instead of queueing into a dead socket.
                inner.transport.disconnect().await;
            }
            Ok(false) => {
                if let Some(tx) = initial.take() {
                    let _ = tx.send(Ok(false));
                }
            }
            Err(e) => {
                // Rejected credentials or bad arguments: retrying with
                // the same input cannot succeed.
                inner.set_state(ConnectionState::Failed {
                    reason: e.to_string(),
                });
                inner.events.emit(ChatEvent::ConnectionError(e.clone()));
                if let Some(tx) = initial.take() {
                    let _ = tx.send(Err(e));
                }
                return;
            }
        }

        if attempt >= inner.config.max_attempts {
            inner.set_state(ConnectionState::Failed {
                reason: format!(
                    "max reconnect attempts ({}) exceeded",
                    inner.config.max_attempts
                ),
            });
            inner
                .events
                .emit(ChatEvent::ConnectionError(ChatError::ReconnectExhausted));
            return;
        }

        let delay = inner.config.delay_for_attempt(attempt);
        attempt += 1;
        inner.set_state(ConnectionState::Reconnecting { attempt });
        inner.events.emit(ChatEvent::Reconnecting { attempt, delay });
        tracing::info!("reconnecting in {:?} (attempt {})", delay, attempt);
        tokio::time::sleep(delay).await;
    }
}
