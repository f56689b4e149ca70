//! Request extractors and credential parsing.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use base64::{Engine, engine::general_purpose::STANDARD};

use super::AuthState;
use crate::engine::AuthEngine;
use crate::oauth::ClientCredentials;
use crate::token::Requester;
use crate::{AuthError, AuthResult};

/// Caller address used as the rate limit subject for unauthenticated routes.
///
/// The socket peer address, unless [`AuthState::trust_forwarded_for`] is set,
/// in which case the first `X-Forwarded-For` hop wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl FromRequestParts<AuthState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        if state.trust_forwarded_for {
            if let Some(addr) = forwarded_for(&parts.headers) {
                return Ok(Self(addr.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(peer))
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parses `Authorization: Basic base64(client_id:client_secret)`.
///
/// Both halves are form-urlencoded per RFC 6749 §2.3.1.
#[must_use]
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((form_decode(id), form_decode(secret)))
}

/// Extracts `Authorization: Bearer <token>`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client credentials from the Basic header, falling back to the body.
///
/// # Errors
///
/// Returns [`AuthError::InvalidClient`] when no client id is present and
/// [`AuthError::InvalidRequest`] when the header and body disagree.
pub fn client_credentials(
    headers: &HeaderMap,
    body_client_id: Option<&str>,
    body_client_secret: Option<&str>,
) -> AuthResult<ClientCredentials> {
    if let Some((client_id, client_secret)) = parse_basic_auth(headers) {
        if body_client_id.is_some_and(|id| id != client_id) {
            return Err(AuthError::invalid_request(
                "client_id in body does not match Authorization header",
            ));
        }
        if body_client_secret.is_some() {
            return Err(AuthError::invalid_request(
                "client authentication must use a single method",
            ));
        }
        return Ok(ClientCredentials::with_secret(client_id, client_secret));
    }

    match body_client_id.filter(|id| !id.is_empty()) {
        Some(client_id) => Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: body_client_secret.map(str::to_string),
        }),
        None => Err(AuthError::invalid_client("client authentication required")),
    }
}

/// Identifies who is calling the introspection or revocation endpoint.
///
/// Client credentials take precedence; otherwise a valid access token
/// identifies its user as the resource owner.
pub async fn resolve_requester(
    engine: &AuthEngine,
    headers: &HeaderMap,
    body_client_id: Option<&str>,
    body_client_secret: Option<&str>,
) -> AuthResult<Requester> {
    if parse_basic_auth(headers).is_some() || body_client_id.is_some() {
        let credentials = client_credentials(headers, body_client_id, body_client_secret)?;
        let client = engine.clients.authenticate(&credentials).await?;
        return Ok(Requester::Client(client.client_id));
    }

    if let Some(token) = bearer_token(headers) {
        let claims = engine.tokens.validate_access_token(token, None).await?;
        return Ok(Requester::ResourceOwner(claims.sub));
    }

    Err(AuthError::invalid_client("client authentication required"))
}

fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(value.as_bytes())
        .next()
        .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{k}={v}") })
        .unwrap_or_default()
}
