//! Conversation log: merges optimistic sends, server pushes, and fetched
//! history into one ordered, de-duplicated message list.
//!
//! The list is always sorted by `sent_at` ascending, ties broken by
//! insertion order. An optimistic message and its server-confirmed
//! counterpart are the same logical message and collapse to one entry:
//! by exact id when the server echoes the provisional id, via the ack
//! nonce otherwise, and as a last resort by a sender+body match within a
//! short window.

use chrono::{DateTime, Utc};

use pawcare_shared::{ChatMessage, MessagePayload};

/// How close an unmatched inbound echo must be to an optimistic entry
/// before the two are treated as the same logical message.
const ECHO_WINDOW_SECS: i64 = 5;

#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log from a fetched history page.
    ///
    /// Entries already present locally are kept unless the page carries
    /// the same message (by id, or as the confirmed copy of an optimistic
    /// send), so a fetch never duplicates what the user already sees.
    pub fn apply_history(&mut self, history: Vec<ChatMessage>) {
        let mut merged = history;
        let existing = std::mem::take(&mut self.messages);
        for message in existing {
            let already_fetched = merged.iter().any(|m| {
                m.id == message.id || (message.is_optimistic && matches_echo(&message, m))
            });
            if !already_fetched {
                merged.push(message);
            }
        }
        merged.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        self.messages = merged;
    }

    /// Insert a server-pushed message.
    ///
    /// An existing entry with the same id is replaced rather than
    /// appended, so the visible list never shows two bubbles for one
    /// logical message. Returns the canonical record that ended up in
    /// the log.
    pub fn apply_inbound(&mut self, payload: MessagePayload) -> ChatMessage {
        let incoming = ChatMessage::from(payload);

        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == incoming.id) {
            *slot = incoming.clone();
            self.resort();
            return incoming;
        }

        // The transport did not echo our provisional id: collapse onto a
        // close-enough optimistic entry instead of appending a duplicate.
        if let Some(slot) = self
            .messages
            .iter_mut()
            .find(|m| m.is_optimistic && matches_echo(m, &incoming))
        {
            *slot = incoming.clone();
            self.resort();
            return incoming;
        }

        self.insert_sorted(incoming.clone());
        incoming
    }

    /// Rebind an optimistic entry to its server-assigned id once the ack
    /// arrives. Returns the confirmed record, or `None` when no entry
    /// carries the nonce.
    pub fn apply_ack(&mut self, nonce: &str, message_id: &str) -> Option<ChatMessage> {
        if let Some(confirmed) = self.messages.iter().find(|m| m.id == message_id).cloned() {
            // The echo won the race: the confirmed entry is already in
            // the log, only the provisional copy has to go.
            self.messages.retain(|m| m.id != nonce);
            return Some(confirmed);
        }

        let slot = self.messages.iter_mut().find(|m| m.id == nonce)?;
        slot.id = message_id.to_string();
        slot.is_optimistic = false;
        Some(slot.clone())
    }

    /// Append an optimistic send. Local clocks are monotonic for a single
    /// sender, so the tail position preserves ordering.
    pub fn apply_optimistic(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Set `read_at` to now on the matching message. Unknown ids are a
    /// silent no-op.
    pub fn mark_read(&mut self, message_id: &str) -> bool {
        self.mark_read_at(message_id, Utc::now())
    }

    /// Set `read_at` on the matching message; an already-read message
    /// keeps its original receipt time.
    pub fn mark_read_at(&mut self, message_id: &str, when: DateTime<Utc>) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                if message.read_at.is_none() {
                    message.read_at = Some(when);
                }
                true
            }
            None => false,
        }
    }

    /// Ordered snapshot for the UI. The log itself is never handed out
    /// mutably.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let pos = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(pos, message);
    }

    fn resort(&mut self) {
        // Stable sort: equal timestamps keep their insertion order.
        self.messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    }
}

fn matches_echo(optimistic: &ChatMessage, confirmed: &ChatMessage) -> bool {
    optimistic.sender_id == confirmed.sender_id
        && optimistic.body == confirmed.body
        && (confirmed.sent_at - optimistic.sent_at)
            .num_seconds()
            .abs()
            <= ECHO_WINDOW_SECS
}
