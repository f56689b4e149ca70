//! Client registration endpoints.
//!
//! ```text
//! POST /oauth/register
//! Content-Type: application/json
//!
//! {"client_name": "My App", "client_type": "public",
//!  "redirect_uris": ["https://app.example.com/callback"], "scope": "openid"}
//! ```
//!
//! Confidential clients receive their `client_secret` in the 201 response
//! only. `POST /oauth/clients/rotate-secret` with the current credentials
//! issues a replacement.

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AuthState;
use super::error::{insert_rate_limit_headers, no_store_headers};
use super::extract::{ClientAddr, client_credentials};
use crate::AuthResult;
use crate::oauth::ClientMetadata;
use crate::ratelimit::RouteClass;

/// Handler for `POST /oauth/register`.
pub async fn register_handler(
    State(state): State<AuthState>,
    ClientAddr(addr): ClientAddr,
    Json(metadata): Json<ClientMetadata>,
) -> AuthResult<Response> {
    let decision = state
        .engine
        .limiter
        .check(RouteClass::Register, &addr)
        .await?;
    let registered = state.engine.clients.register(metadata).await?;

    let mut headers = no_store_headers();
    insert_rate_limit_headers(&mut headers, &decision);
    Ok((StatusCode::CREATED, headers, Json(registered)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct RotateSecretForm {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Handler for `POST /oauth/clients/rotate-secret`.
pub async fn rotate_secret_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(form): Form<RotateSecretForm>,
) -> AuthResult<Response> {
    let credentials = client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    )?;
    state
        .engine
        .limiter
        .check(RouteClass::Register, &credentials.client_id)
        .await?;
    let secret = state.engine.clients.rotate_secret(&credentials).await?;

    Ok((
        no_store_headers(),
        Json(serde_json::json!({
            "client_id": credentials.client_id,
            "client_secret": secret,
        })),
    )
        .into_response())
}
