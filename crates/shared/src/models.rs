//! Canonical data models for marketplace chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a chat participant within the marketplace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantKind {
    /// A pet owner.
    User,
    /// A care provider.
    Provider,
}

impl ParticipantKind {
    /// Lowercase wire/path segment for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::User => "user",
            ParticipantKind::Provider => "provider",
        }
    }
}

/// One side of a conversation as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub kind: ParticipantKind,
}

/// The (recipient id, recipient kind) pair scoping one chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub recipient_id: String,
    pub recipient_kind: ParticipantKind,
}

impl ConversationContext {
    pub fn new(recipient_id: impl Into<String>, recipient_kind: ParticipantKind) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            recipient_kind,
        }
    }
}

/// A message as held by the client-side conversation log.
///
/// `id` is either server-assigned or, for optimistic sends, a provisional
/// id from [`provisional_message_id`] that the server later rebinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_kind: ParticipantKind,
    pub recipient_id: String,
    pub recipient_kind: ParticipantKind,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// True until the server confirms receipt. Local bookkeeping only,
    /// never serialized.
    #[serde(skip)]
    pub is_optimistic: bool,
}

/// Check that an identifier is well-formed: non-empty, lowercase ASCII
/// alphanumerics plus `.`, `_` and `-`.
pub fn validate_participant_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' || c == '-'
        })
}

/// Generate a provisional message id for an optimistic send. The
/// timestamp prefix keeps provisional ids sortable; the random suffix
/// keeps them unique across rapid sends.
pub fn provisional_message_id() -> String {
    format!(
        "local-{}-{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}
