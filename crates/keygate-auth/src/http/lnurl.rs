//! LNURL-auth wallet callback (LUD-04).
//!
//! ```text
//! GET /auth/lnurl?tag=login&k1=<hex>&sig=<DER hex>&key=<pubkey hex>
//! ```
//!
//! Wallets expect `{"status":"OK"}` or `{"status":"ERROR","reason":"..."}`
//! rather than OAuth error bodies.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AuthState;
use super::error::status_for;
use super::extract::ClientAddr;
use crate::AuthError;
use crate::ratelimit::RouteClass;

#[derive(Debug, Clone, Deserialize)]
pub struct LnurlCallback {
    #[serde(default)]
    pub tag: Option<String>,
    pub k1: String,
    pub sig: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum LnurlStatus {
    Ok,
    Error { reason: String },
}

/// Handler for `GET /auth/lnurl`.
pub async fn lnurl_callback_handler(
    State(state): State<AuthState>,
    ClientAddr(addr): ClientAddr,
    Query(callback): Query<LnurlCallback>,
) -> Response {
    match verify(&state, &addr, &callback).await {
        Ok(()) => (StatusCode::OK, Json(LnurlStatus::Ok)).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "LNURL login rejected");
            let reason = if e.is_server_error() {
                "internal error".to_string()
            } else {
                e.to_string()
            };
            (status_for(&e), Json(LnurlStatus::Error { reason })).into_response()
        }
    }
}

async fn verify(state: &AuthState, addr: &str, callback: &LnurlCallback) -> Result<(), AuthError> {
    state.engine.limiter.check(RouteClass::Verify, addr).await?;
    if callback.tag.as_deref().is_some_and(|tag| tag != "login") {
        return Err(AuthError::invalid_request("unsupported tag"));
    }
    state
        .engine
        .challenges
        .verify_by_k1(&callback.k1, &callback.key, &callback.sig)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&LnurlStatus::Ok).unwrap(),
            r#"{"status":"OK"}"#
        );
        assert_eq!(
            serde_json::to_string(&LnurlStatus::Error {
                reason: "Challenge expired".to_string()
            })
            .unwrap(),
            r#"{"status":"ERROR","reason":"Challenge expired"}"#
        );
    }
}
