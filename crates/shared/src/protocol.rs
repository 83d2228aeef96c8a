//! Wire protocol for the realtime messaging channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Participant, ParticipantKind};

/// Envelope wrapping every frame in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Commands the client sends to the message server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    #[serde(rename = "message.create")]
    MessageCreate {
        recipient_id: String,
        recipient_kind: ParticipantKind,
        body: String,
        /// Provisional client id; the server echoes it in the ack so the
        /// optimistic entry can be rebound to the real id.
        nonce: String,
    },
    #[serde(rename = "message.read")]
    MessageRead { message_id: String },
}

/// Wire shape of a server-delivered message; the client store normalizes
/// it into [`ChatMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub sender: Participant,
    pub recipient: Participant,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl From<MessagePayload> for ChatMessage {
    fn from(payload: MessagePayload) -> Self {
        ChatMessage {
            id: payload.id,
            sender_id: payload.sender.id,
            sender_kind: payload.sender.kind,
            recipient_id: payload.recipient.id,
            recipient_kind: payload.recipient.kind,
            body: payload.body,
            sent_at: payload.sent_at,
            read_at: payload.read_at,
            is_optimistic: false,
        }
    }
}

/// Events pushed by the message server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: MessagePayload },
    #[serde(rename = "message.read")]
    MessageRead {
        message_id: String,
        read_at: DateTime<Utc>,
    },
    Ack {
        nonce: String,
        message_id: String,
    },
    Error {
        code: String,
        message: String,
        correlation_id: Option<String>,
    },
}
