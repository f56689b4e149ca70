//! Token introspection endpoint handler (RFC 7662).
//!
//! ```text
//! POST /oauth/introspect
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <client_credentials>
//!
//! token=<token_to_introspect>&token_type_hint=access_token
//! ```
//!
//! Callers authenticate as a client, or present their own access token as
//! a bearer token. Tokens they do not own are reported inactive.

use axum::{
    Form, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AuthState;
use super::error::{insert_rate_limit_headers, no_store_headers};
use super::extract::resolve_requester;
use crate::AuthResult;
use crate::ratelimit::RouteClass;

/// Form shared by the introspection and revocation endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenActionForm {
    #[serde(default)]
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Handler for `POST /oauth/introspect`.
pub async fn introspect_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(form): Form<TokenActionForm>,
) -> AuthResult<Response> {
    let requester = resolve_requester(
        &state.engine,
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    )
    .await?;
    let decision = state
        .engine
        .limiter
        .check(RouteClass::Introspect, requester.label())
        .await?;

    let response = state.engine.tokens.introspect(&form.token, &requester).await?;

    let mut headers = no_store_headers();
    insert_rate_limit_headers(&mut headers, &decision);
    Ok((headers, Json(response)).into_response())
}
