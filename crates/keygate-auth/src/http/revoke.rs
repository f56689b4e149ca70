//! Token revocation endpoint handler (RFC 7009).
//!
//! ```text
//! POST /oauth/revoke
//! Content-Type: application/x-www-form-urlencoded
//!
//! token=<token>&token_type_hint=refresh_token&client_id=...
//! ```
//!
//! Unknown tokens are answered with 200 like known ones. Revoking a token
//! owned by someone else is refused with 403.

use axum::{
    Form, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use super::AuthState;
use super::error::{insert_rate_limit_headers, no_store_headers};
use super::extract::resolve_requester;
use super::introspect::TokenActionForm;
use crate::ratelimit::RouteClass;
use crate::token::TokenTypeHint;
use crate::{AuthError, AuthResult};

/// Handler for `POST /oauth/revoke`.
pub async fn revoke_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(form): Form<TokenActionForm>,
) -> AuthResult<Response> {
    if form.token.is_empty() {
        return Err(AuthError::invalid_request("missing parameter: token"));
    }
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
        .check(RouteClass::Revoke, requester.label())
        .await?;

    let hint = TokenTypeHint::parse(form.token_type_hint.as_deref());
    state
        .engine
        .tokens
        .revoke_token(&form.token, hint, &requester)
        .await?;

    let mut headers = no_store_headers();
    insert_rate_limit_headers(&mut headers, &decision);
    Ok((headers, Json(serde_json::json!({ "ok": true }))).into_response())
}
