//! Introspection (RFC 7662) and revocation (RFC 7009) types.

use serde::{Deserialize, Serialize};

/// Who is asking about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    /// An authenticated client.
    Client(String),
    /// A user, identified by a valid access token of their own.
    ResourceOwner(String),
}

impl Requester {
    /// Whether the requester owns a token issued to `client_id` for `user_id`.
    #[must_use]
    pub fn owns(&self, client_id: &str, user_id: &str) -> bool {
        match self {
            Self::Client(id) => id == client_id,
            Self::ResourceOwner(id) => id == user_id,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Client(id) | Self::ResourceOwner(id) => id,
        }
    }
}

/// `token_type_hint` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Unknown hints are ignored (RFC 7009 §2.1).
    #[must_use]
    pub fn parse(hint: Option<&str>) -> Option<Self> {
        match hint {
            Some("access_token") => Some(Self::AccessToken),
            Some("refresh_token") => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

/// Introspection response. Inactive responses carry no claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}
