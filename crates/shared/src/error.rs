//! Error types shared by the messaging core: the RFC7807 envelope the
//! REST API speaks, the client-side API error, and the session taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The marketplace API uses this as its canonical error envelope, so the
/// client can surface meaningful auth and validation errors instead of
/// failing to decode a success response type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// A URI reference that identifies the specific occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a
/// user-facing message. Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Network(String),
    Http { status: u16, body: String },
    Deserialize(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Failure taxonomy of the realtime session.
///
/// `Transport` is recoverable and routed through reconnection; the rest
/// are surfaced to the caller and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Network-level failure: connection drop, socket error.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Missing or rejected credentials; retrying with the same token
    /// cannot succeed.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Malformed call arguments; rejected before any network I/O.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The retry cap was hit; an explicit reset is required to resume.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}
