//! Shared types for the pawcare messaging core: canonical data models,
//! the realtime wire protocol, and error envelopes.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
