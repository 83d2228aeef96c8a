//! Session facade: the single object a UI surface holds for one
//! conversation.
//!
//! Composes the transport, the reconnection controller, and the
//! conversation log, and guarantees at most one live connection per
//! conversation context. The UI reads snapshots and subscribes to
//! events; it never mutates message state directly.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use url::Url;

use pawcare_shared::{
    provisional_message_id, validate_participant_id, ChatError, ChatMessage, ClientCommand,
    ConversationContext, MessagePayload, ParticipantKind, ServerEvent,
};

use crate::events::{ChatEvent, ChatEvents};
use crate::history::HistoryProvider;
use crate::identity::{decode_identity, UserIdentity};
use crate::store::ConversationLog;
use crate::ws::{
    ConnectionState, ReconnectConfig, ReconnectController, Transport, TransportEvent, WsTransport,
};

pub struct ChatSession {
    inner: Arc<SessionInner>,
    controller: Arc<ReconnectController>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    history: Arc<dyn HistoryProvider>,
    log: Mutex<ConversationLog>,
    events: ChatEvents,
    identity: Mutex<Option<UserIdentity>>,
    context: Mutex<Option<ConversationContext>>,
    token: Mutex<Option<String>>,
    history_loaded: Mutex<bool>,
}

impl ChatSession {
    /// Create a session talking to `ws_endpoint`, with history fetched
    /// from `history` after the first successful connect.
    pub fn new(ws_endpoint: Url, history: Arc<dyn HistoryProvider>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(ws_endpoint, event_tx));
        Self::with_transport(transport, event_rx, history, ReconnectConfig::default())
    }

    /// Assemble a session from an explicit transport seam. `events` must
    /// be the receiving end of the channel the transport pushes into.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        history: Arc<dyn HistoryProvider>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let emitter = ChatEvents::new();
        let inner = Arc::new(SessionInner {
            transport: transport.clone(),
            history,
            log: Mutex::new(ConversationLog::new()),
            events: emitter.clone(),
            identity: Mutex::new(None),
            context: Mutex::new(None),
            token: Mutex::new(None),
            history_loaded: Mutex::new(false),
        });

        let handler_inner = inner.clone();
        let controller = Arc::new(ReconnectController::new(
            transport,
            reconnect,
            emitter,
            events,
            move |event| handler_inner.handle_server_event(event),
        ));

        Self { inner, controller }
    }

    /// Open (or reuse) the realtime connection for `context`.
    ///
    /// Resolves with the outcome of the initial attempt; failed attempts
    /// keep retrying in the background up to the configured cap. Already
    /// connected for the same context, this is a no-op. For a different
    /// context the old connection is torn down first and the log starts
    /// empty.
    pub async fn connect(
        &self,
        context: ConversationContext,
        token: &str,
    ) -> Result<bool, ChatError> {
        let identity = decode_identity(token)?;
        if !validate_participant_id(&context.recipient_id) {
            return Err(ChatError::Validation("malformed recipient id".to_string()));
        }

        let current = self.inner.context.lock().clone();
        if let Some(current) = current {
            if current == context && self.state().is_connected() {
                return Ok(true);
            }
            if current != context {
                self.disconnect().await;
                self.inner.log.lock().clear();
                *self.inner.history_loaded.lock() = false;
            }
        }

        *self.inner.identity.lock() = Some(identity);
        *self.inner.context.lock() = Some(context);
        *self.inner.token.lock() = Some(token.to_string());

        let outcome = self.controller.connect(token).await;
        // Armed after the initial attempt resolves so the loader never
        // observes a stale Failed state from a previous run.
        self.spawn_history_loader();
        outcome
    }

    /// Validate and transmit one message to the connected recipient.
    ///
    /// `Ok(false)` means the transport refused the send (not connected);
    /// nothing is added to the log in that case. The optimistic entry is
    /// registered only after the transport accepts the send, so a failed
    /// transmit never shows a bubble.
    pub async fn send_message(
        &self,
        recipient_id: &str,
        recipient_kind: ParticipantKind,
        body: &str,
    ) -> Result<bool, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::Validation("empty message body".to_string()));
        }
        if !validate_participant_id(recipient_id) {
            return Err(ChatError::Validation("malformed recipient id".to_string()));
        }

        let identity = self
            .inner
            .identity
            .lock()
            .clone()
            .ok_or_else(|| ChatError::Validation("send before connect".to_string()))?;
        let context = self
            .inner
            .context
            .lock()
            .clone()
            .ok_or_else(|| ChatError::Validation("send before connect".to_string()))?;
        if context.recipient_id != recipient_id || context.recipient_kind != recipient_kind {
            return Err(ChatError::Validation(
                "recipient does not match the connected conversation".to_string(),
            ));
        }

        let nonce = provisional_message_id();
        let command = ClientCommand::MessageCreate {
            recipient_id: recipient_id.to_string(),
            recipient_kind,
            body: body.to_string(),
            nonce: nonce.clone(),
        };

        if !self.inner.transport.send(command).await {
            return Ok(false);
        }

        let message = ChatMessage {
            id: nonce,
            sender_id: identity.user_id,
            sender_kind: identity.kind,
            recipient_id: recipient_id.to_string(),
            recipient_kind,
            body: body.to_string(),
            sent_at: Utc::now(),
            read_at: None,
            is_optimistic: true,
        };
        self.inner.log.lock().apply_optimistic(message.clone());
        self.inner.events.emit(ChatEvent::Message(message));
        Ok(true)
    }

    /// Mark a message as read locally and tell the server, best effort.
    /// Unknown ids are a silent no-op.
    pub async fn mark_read(&self, message_id: &str) {
        if !self.inner.log.lock().mark_read(message_id) {
            return;
        }
        self.inner.events.emit(ChatEvent::ReadReceipt {
            message_id: message_id.to_string(),
        });
        let command = ClientCommand::MessageRead {
            message_id: message_id.to_string(),
        };
        if !self.inner.transport.send(command).await {
            tracing::debug!("read receipt for {} not transmitted", message_id);
        }
    }

    /// Tear down the transport and cancel any pending reconnection work.
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.controller.disconnect().await;
    }

    /// User-triggered retry after the session reached `Failed`.
    pub async fn reset(&self) -> Result<bool, ChatError> {
        let outcome = self.controller.reset().await;
        self.spawn_history_loader();
        outcome
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Watch connection-state transitions without subscribing to the
    /// full event stream.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.controller.watch()
    }

    /// Ordered snapshot of the conversation.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.log.lock().snapshot()
    }

    /// Event stream shared by every subscriber of this session.
    pub fn events(&self) -> &ChatEvents {
        &self.inner.events
    }

    pub fn context(&self) -> Option<ConversationContext> {
        self.inner.context.lock().clone()
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.inner.identity.lock().clone()
    }

    /// Arrange for one history fetch at the next `Connected`, whether
    /// that is the initial attempt or a later background retry.
    fn spawn_history_loader(&self) {
        if *self.inner.history_loaded.lock() {
            return;
        }
        let inner = self.inner.clone();
        let mut state_rx = self.controller.watch();
        tokio::spawn(async move {
            loop {
                let reached = {
                    let state = state_rx.borrow_and_update();
                    match &*state {
                        ConnectionState::Connected => true,
                        ConnectionState::Failed { .. } => return,
                        _ => false,
                    }
                };
                if reached {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
            inner.load_history().await;
        });
    }
}

impl SessionInner {
    fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::MessageNew { message } => {
                if !self.belongs_to_context(&message) {
                    tracing::debug!("dropping message {} from another conversation", message.id);
                    return;
                }
                let applied = self.log.lock().apply_inbound(message);
                self.events.emit(ChatEvent::Message(applied));
            }
            ServerEvent::MessageRead {
                message_id,
                read_at,
            } => {
                if self.log.lock().mark_read_at(&message_id, read_at) {
                    self.events.emit(ChatEvent::ReadReceipt { message_id });
                }
            }
            ServerEvent::Ack { nonce, message_id } => {
                if let Some(confirmed) = self.log.lock().apply_ack(&nonce, &message_id) {
                    self.events.emit(ChatEvent::Ack {
                        provisional_id: nonce,
                        message_id,
                    });
                    self.events.emit(ChatEvent::Message(confirmed));
                }
            }
            ServerEvent::Error { code, message, .. } => {
                tracing::warn!("server error {}: {}", code, message);
            }
        }
    }

    /// A push belongs to this session when the conversation peer is on
    /// either end of it.
    fn belongs_to_context(&self, message: &MessagePayload) -> bool {
        let context = self.context.lock();
        let Some(context) = context.as_ref() else {
            return false;
        };
        let is_peer = |id: &str, kind: ParticipantKind| {
            id == context.recipient_id && kind == context.recipient_kind
        };
        is_peer(&message.sender.id, message.sender.kind)
            || is_peer(&message.recipient.id, message.recipient.kind)
    }

    async fn load_history(&self) {
        let context = self.context.lock().clone();
        let token = self.token.lock().clone();
        let (Some(context), Some(token)) = (context, token) else {
            return;
        };
        if *self.history_loaded.lock() {
            return;
        }

        match self.history.fetch_conversation(&context, &token).await {
            Ok(page) => {
                let count = page.len();
                self.log.lock().apply_history(page);
                *self.history_loaded.lock() = true;
                self.events.emit(ChatEvent::HistoryLoaded { count });
            }
            Err(e) => tracing::warn!("history fetch failed: {}", e),
        }
    }
}
