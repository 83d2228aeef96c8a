//! WebSocket transport over tokio-tungstenite.

use chrono::Utc;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use url::Url;

use pawcare_shared::{ChatError, ClientCommand, ServerEvent, WsEnvelope};

use super::{Transport, TransportEvent, TransportEvents};

/// A managed WebSocket connection to the message server.
///
/// Owns at most one socket; inbound frames are decoded and pushed into
/// the event channel supplied at construction, followed by a single
/// `Closed` once the socket dies.
pub struct WsTransport {
    endpoint: Url,
    events: TransportEvents,
    active: tokio::sync::Mutex<Option<ActiveSocket>>,
}

struct ActiveSocket {
    commands: UnboundedSender<WsEnvelope<ClientCommand>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsTransport {
    /// Create a transport for `endpoint` (a `ws://` or `wss://` URL).
    pub fn new(endpoint: Url, events: TransportEvents) -> Self {
        Self {
            endpoint,
            events,
            active: tokio::sync::Mutex::new(None),
        }
    }

    fn authed_url(&self, token: &str) -> String {
        format!("{}?access_token={}", self.endpoint, urlencoding::encode(token))
    }

    async fn teardown(&self) {
        if let Some(socket) = self.active.lock().await.take() {
            socket.reader.abort();
            socket.writer.abort();
            drop(socket.commands);
            tracing::info!("websocket to {} closed", self.endpoint);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // The socket must not outlive its owner.
        if let Some(socket) = self.active.get_mut().take() {
            socket.reader.abort();
            socket.writer.abort();
        }
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, token: &str) -> Result<bool, ChatError> {
        if token.trim().is_empty() {
            return Err(ChatError::Validation("missing access token".to_string()));
        }

        // One socket at a time: tear down any previous connection first.
        self.teardown().await;

        let url = self.authed_url(token);
        let (stream, _response) = match connect_async(&url).await {
            Ok(ok) => ok,
            Err(tungstenite::Error::Http(resp))
                if resp.status() == 401 || resp.status() == 403 =>
            {
                return Err(ChatError::Auth(format!(
                    "server rejected credentials ({})",
                    resp.status()
                )));
            }
            Err(e) => {
                tracing::warn!("websocket connect to {} failed: {}", self.endpoint, e);
                return Ok(false);
            }
        };

        tracing::info!("websocket connected to {}", self.endpoint);
        let (mut sink, mut source) = stream.split();
        let (command_tx, mut command_rx) = unbounded::<WsEnvelope<ClientCommand>>();

        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            let mut reason = "connection closed".to_string();
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<WsEnvelope<ServerEvent>>(&text) {
                            Ok(envelope) => {
                                let _ = events.send(TransportEvent::Event(envelope.payload));
                            }
                            Err(e) => tracing::error!("unparseable frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        reason = "close frame received".to_string();
                        break;
                    }
                    // Pong replies are handled by tungstenite itself.
                    Ok(_) => {}
                    Err(e) => {
                        reason = e.to_string();
                        break;
                    }
                }
            }
            let _ = events.send(TransportEvent::Closed { reason });
        });

        let writer = tokio::spawn(async move {
            while let Some(envelope) = command_rx.next().await {
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::error!("websocket send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("serialize failed: {}", e),
                }
            }
        });

        *self.active.lock().await = Some(ActiveSocket {
            commands: command_tx,
            reader,
            writer,
        });
        Ok(true)
    }

    async fn send(&self, command: ClientCommand) -> bool {
        let active = self.active.lock().await;
        let Some(socket) = active.as_ref() else {
            return false;
        };
        let envelope = WsEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            payload: command,
            ts: Utc::now(),
            correlation_id: None,
        };
        socket.commands.unbounded_send(envelope).is_ok()
    }

    async fn disconnect(&self) {
        self.teardown().await;
    }
}
