//! Login challenge endpoints.
//!
//! ```text
//! POST /auth/challenge                 -> {k1, session_id, expires_at, lnurl}
//! GET  /auth/challenge/{session_id}    -> {status}
//! POST /auth/challenge/verify          -> {ok: true}
//! ```
//!
//! Browsers create a challenge, show the `lnurl` to the user's wallet and
//! poll until the status turns `verified`.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::AuthState;
use super::error::{insert_rate_limit_headers, no_store_headers};
use super::extract::ClientAddr;
use crate::AuthResult;
use crate::ratelimit::RouteClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub k1: String,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Wallet callback URL carrying the k1.
    pub lnurl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeStatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub session_id: String,
    pub k1: String,
    pub pubkey: String,
    pub signature: String,
}

/// Handler for `POST /auth/challenge`.
pub async fn create_challenge_handler(
    State(state): State<AuthState>,
    ClientAddr(addr): ClientAddr,
) -> AuthResult<Response> {
    let decision = state
        .engine
        .limiter
        .check(RouteClass::Challenge, &addr)
        .await?;
    let issued = state.engine.challenges.create_challenge().await?;

    let lnurl = lnurl_callback(&state.engine.config.issuer, &issued.k1);
    let mut headers = no_store_headers();
    insert_rate_limit_headers(&mut headers, &decision);

    Ok((
        headers,
        Json(ChallengeResponse {
            k1: issued.k1,
            session_id: issued.session_id,
            expires_at: issued.expires_at,
            lnurl,
        }),
    )
        .into_response())
}

/// Handler for `GET /auth/challenge/{session_id}`.
pub async fn challenge_status_handler(
    State(state): State<AuthState>,
    Path(session_id): Path<String>,
) -> AuthResult<Json<ChallengeStatusResponse>> {
    let status = state.engine.challenges.status(&session_id).await?;
    Ok(Json(ChallengeStatusResponse {
        status: status.as_str().to_string(),
    }))
}

/// Handler for `POST /auth/challenge/verify`.
pub async fn verify_challenge_handler(
    State(state): State<AuthState>,
    ClientAddr(addr): ClientAddr,
    Json(request): Json<VerifyRequest>,
) -> AuthResult<Response> {
    let decision = state.engine.limiter.check(RouteClass::Verify, &addr).await?;
    state
        .engine
        .challenges
        .verify_challenge(
            &request.session_id,
            &request.k1,
            &request.pubkey,
            &request.signature,
        )
        .await?;

    let mut headers = no_store_headers();
    insert_rate_limit_headers(&mut headers, &decision);
    Ok((headers, Json(serde_json::json!({ "ok": true }))).into_response())
}

/// `{issuer}/auth/lnurl?tag=login&k1=...&action=login`
#[must_use]
pub fn lnurl_callback(issuer: &str, k1: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/auth/lnurl?tag=login&k1={k1}&action=login")
}
