//! Authorization endpoint handler.
//!
//! ```text
//! GET /oauth/authorize?response_type=code&client_id=...&redirect_uri=...
//!     &scope=openid&state=...&code_challenge=...&code_challenge_method=S256
//!     &session_id=...[&k1=...&key=...&sig=...]
//! ```
//!
//! Responds `302 Found` to the client's redirect URI with `code` and
//! `state`, or with `error` once the client and redirect URI are trusted.
//! Errors about the client or redirect URI itself are returned as JSON.

use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AuthState;
use super::error::no_store_headers;
use crate::oauth::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, LoginProof, SignedLogin,
};
use crate::{AuthError, AuthResult};

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub session_id: Option<String>,
    pub k1: Option<String>,
    pub key: Option<String>,
    pub sig: Option<String>,
}

impl AuthorizeQuery {
    fn request(&self) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: self.response_type.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
        }
    }

    fn login(&self) -> Option<LoginProof> {
        let session_id = self.session_id.clone().filter(|s| !s.is_empty())?;
        match (&self.k1, &self.key, &self.sig) {
            (Some(k1), Some(key), Some(sig)) => Some(LoginProof::signed(
                session_id,
                SignedLogin {
                    k1: k1.clone(),
                    public_key: key.clone(),
                    signature: sig.clone(),
                },
            )),
            _ => Some(LoginProof::verified(session_id)),
        }
    }
}

/// Handler for `GET /oauth/authorize`.
pub async fn authorize_handler(
    State(state): State<AuthState>,
    Query(query): Query<AuthorizeQuery>,
) -> AuthResult<Response> {
    if query.client_id.is_empty() || query.redirect_uri.is_empty() {
        return Err(AuthError::invalid_request(
            "client_id and redirect_uri are required",
        ));
    }
    state
        .engine
        .authorization
        .validate_client_redirect(&query.client_id, &query.redirect_uri)
        .await?;

    // From here on the redirect URI is trusted and errors go back to the client.
    let Some(login) = query.login() else {
        let error = AuthorizationError {
            error: AuthorizationErrorCode::InvalidRequest,
            error_description: Some("session_id is required".to_string()),
            state: query.state.clone(),
        };
        return redirect(error.to_redirect_url(&query.redirect_uri));
    };

    match state
        .engine
        .authorization
        .authorize(&query.request(), &login)
        .await
    {
        Ok(response) => redirect(response.to_redirect_url()),
        Err(e) => {
            let error = AuthorizationError::from_auth_error(&e, query.state.clone());
            redirect(error.to_redirect_url(&query.redirect_uri))
        }
    }
}

fn redirect(location: Result<String, url::ParseError>) -> AuthResult<Response> {
    let location =
        location.map_err(|e| AuthError::internal(format!("cannot build redirect: {e}")))?;
    let mut headers = no_store_headers();
    headers.insert(
        header::LOCATION,
        location
            .parse()
            .map_err(|_| AuthError::internal("redirect location is not a valid header"))?,
    );
    Ok((StatusCode::FOUND, headers).into_response())
}
