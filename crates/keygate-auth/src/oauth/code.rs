//! Authorization code records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::pkce::PkceChallenge;
use super::scope::ScopeSet;

/// A stored authorization code, keyed by the SHA-256 of the code itself.
///
/// Records stay in the store past `expires_at` so late exchanges are told
/// the code expired rather than that it never existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: ScopeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<PkceChallenge>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub used: bool,
    /// Token family minted by the exchange. Set together with `used`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    /// When the winning exchange marked the code used.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub redeemed_at: Option<OffsetDateTime>,
}

impl AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Copy marked as exchanged into `family_id` at `now`.
    #[must_use]
    pub fn redeemed(&self, family_id: &str, now: OffsetDateTime) -> Self {
        Self {
            used: true,
            family_id: Some(family_id.to_string()),
            redeemed_at: Some(now),
            ..self.clone()
        }
    }

    /// Whether a presentation at `now` falls inside `grace` of the winning
    /// exchange, i.e. it raced that exchange rather than replaying the code.
    #[must_use]
    pub fn raced_redemption(&self, now: OffsetDateTime, grace: std::time::Duration) -> bool {
        self.redeemed_at
            .is_some_and(|redeemed_at| now - redeemed_at < grace)
    }
}
