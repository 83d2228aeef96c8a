//! Typed event fan-out for the session facade.
//!
//! Any number of UI surfaces can subscribe to one session; a
//! [`Subscription`] detaches its listener when dropped, so a surface that
//! unmounts stops receiving events without touching the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use pawcare_shared::{ChatError, ChatMessage};

use crate::ws::ConnectionState;

/// Everything the session reports to the UI layer.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A message entered or changed in the conversation log.
    Message(ChatMessage),
    /// History was fetched and merged into the log.
    HistoryLoaded { count: usize },
    /// A read receipt was applied.
    ReadReceipt { message_id: String },
    /// The server confirmed an optimistic send.
    Ack {
        provisional_id: String,
        message_id: String,
    },
    /// A retry was scheduled after a transport failure.
    Reconnecting { attempt: u32, delay: Duration },
    /// The connection came back after one or more retries.
    Reconnected,
    /// A terminal connection error: auth rejection or retry exhaustion.
    ConnectionError(ChatError),
    /// The connection state machine moved.
    StateChanged(ConnectionState),
}

type Listener = Box<dyn Fn(&ChatEvent) + Send + Sync>;

/// Multi-subscriber event emitter.
#[derive(Clone, Default)]
pub struct ChatEvents {
    inner: Arc<EmitterInner>,
}

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

impl ChatEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned handle detaches it when dropped
    /// or via [`Subscription::unsubscribe`].
    #[must_use = "dropping the subscription detaches the listener"]
    pub fn subscribe(&self, listener: impl Fn(&ChatEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Box::new(listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn emit(&self, event: ChatEvent) {
        let listeners = self.inner.listeners.lock();
        for listener in listeners.values() {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Handle for one registered listener.
pub struct Subscription {
    id: u64,
    inner: Weak<EmitterInner>,
}

impl Subscription {
    /// Detach the listener now instead of at drop time.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}
