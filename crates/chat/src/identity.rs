//! Identity decoding from the externally-supplied access token.
//!
//! The token is opaque to this core: the server issues and validates it,
//! the client only reads the local user's id and role out of the JWT
//! payload segment. No signature verification happens here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use pawcare_shared::{ChatError, ParticipantKind};

/// The local user as derived from the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub kind: ParticipantKind,
}

/// Claims this client cares about. Everything else in the token is
/// ignored.
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
}

/// Decode `sub` and `role` from a JWT-shaped bearer token.
///
/// A structurally malformed token is rejected with [`ChatError::Auth`]
/// before any connection attempt is made.
pub fn decode_identity(token: &str) -> Result<UserIdentity, ChatError> {
    if token.trim().is_empty() {
        return Err(ChatError::Auth("missing access token".to_string()));
    }

    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
        _ => return Err(ChatError::Auth("malformed access token".to_string())),
    };
    if segments.next().is_some() {
        return Err(ChatError::Auth("malformed access token".to_string()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| ChatError::Auth("undecodable access token payload".to_string()))?;
    let claims: AccessTokenClaims = serde_json::from_slice(&bytes)
        .map_err(|_| ChatError::Auth("unreadable access token claims".to_string()))?;

    if claims.sub.is_empty() {
        return Err(ChatError::Auth("access token has no subject".to_string()));
    }

    let kind = match claims.role.as_deref() {
        Some("provider") => ParticipantKind::Provider,
        _ => ParticipantKind::User,
    };

    Ok(UserIdentity {
        user_id: claims.sub,
        kind,
    })
}
