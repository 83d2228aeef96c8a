//! Pawcare realtime messaging client.
//!
//! The chat core that sits under the marketplace UI: one WebSocket
//! transport, bounded-backoff reconnection, and a reconciler that merges
//! optimistic sends, server pushes, and fetched history into a single
//! ordered conversation log. UI surfaces hold a [`ChatSession`] and
//! observe it through [`ChatEvents`] subscriptions and state watches.

pub mod events;
pub mod history;
pub mod identity;
pub mod session;
pub mod store;
pub mod ws;

pub use events::{ChatEvent, ChatEvents, Subscription};
pub use history::{HistoryProvider, RestHistoryClient};
pub use identity::{decode_identity, UserIdentity};
pub use session::ChatSession;
pub use store::ConversationLog;
pub use ws::{
    ConnectionState, ReconnectConfig, ReconnectController, Transport, TransportEvent, WsTransport,
};

pub use pawcare_shared::{
    ApiError, ChatError, ChatMessage, ConversationContext, ParticipantKind,
};
