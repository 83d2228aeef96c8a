//! Client-side message state.

mod messages;

pub use messages::ConversationLog;
