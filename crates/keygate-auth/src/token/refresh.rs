//! Refresh token records.
//!
//! The plaintext token is 256 random bits, base64url encoded, and is only
//! ever returned to the client. The store keys records by the token's
//! SHA-256 hash.
//!
//! Rotation links records into a family: each child points at its parent
//! through `parent_id`, and the rotated parent points forward through
//! `child_id`. All members share one `family_id`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::oauth::scope::ScopeSet;

/// Stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// SHA-256 hex of the token.
    pub id: String,
    pub family_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    pub client_id: String,
    pub user_id: String,
    pub scope: ScopeSet,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub revoked: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Copy of this record marked revoked.
    #[must_use]
    pub fn revoked_copy(&self, now: OffsetDateTime) -> Self {
        Self {
            revoked: true,
            revoked_at: Some(self.revoked_at.unwrap_or(now)),
            ..self.clone()
        }
    }
}

/// Generates an opaque 256-bit token (43 base64url characters).
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex of a token. Used for refresh tokens and authorization codes.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
