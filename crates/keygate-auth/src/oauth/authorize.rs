//! Authorization endpoint types.
//!
//! # Authorization Code Flow
//!
//! 1. The client sends the user to `/oauth/authorize` with its request
//!    parameters and the session id of a login challenge.
//! 2. The user signs the challenge's k1 with their wallet.
//! 3. The server redirects back to the client with a one-time code.
//! 4. The client exchanges the code and its PKCE verifier for tokens.
//!
//! Errors are reported by redirect only once the client and redirect URI
//! are known to be valid. Otherwise they are shown directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::AuthError;

/// Authorization request parameters.
///
/// ```ignore
/// GET /oauth/authorize?
///   response_type=code
///   &client_id=kgc_0d9c...
///   &redirect_uri=https://app.example.com/callback
///   &scope=openid profile
///   &state=abc123xyz
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
///   &session_id=4d3c...
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRequest {
    /// Must be "code".
    pub response_type: String,
    pub client_id: String,
    /// Must exactly match a registered redirect URI.
    pub redirect_uri: String,
    /// Space-delimited. Defaults to the client's registered scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Echoed back on the redirect.
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// Only "S256". Defaults to "S256" when a challenge is present.
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Successful authorization, delivered by redirect.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    /// Single-use code. Expires after the configured code lifetime.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Where to send the user.
    #[serde(skip)]
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// Builds the redirect URL with `code` and `state` appended.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Authorization error delivered by redirect.
///
/// ```ignore
/// HTTP/1.1 302 Found
/// Location: https://app.example.com/callback?
///   error=invalid_scope
///   &error_description=unsupported+scopes:+admin
///   &state=abc123xyz
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationError {
    pub error: AuthorizationErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationError {
    #[must_use]
    pub fn new(error: AuthorizationErrorCode, state: Option<String>) -> Self {
        Self {
            error,
            error_description: None,
            state,
        }
    }

    /// Translates a service error into the redirect error vocabulary of
    /// RFC 6749 §4.1.2.1.
    #[must_use]
    pub fn from_auth_error(error: &AuthError, state: Option<String>) -> Self {
        let code = match error {
            AuthError::InvalidScope { .. } => AuthorizationErrorCode::InvalidScope,
            AuthError::UnsupportedResponseType { .. } => {
                AuthorizationErrorCode::UnsupportedResponseType
            }
            AuthError::InvalidSignature
            | AuthError::ChallengeExpired
            | AuthError::AlreadyConsumed { .. } => AuthorizationErrorCode::AccessDenied,
            AuthError::InvalidClient { .. } | AuthError::Unauthorized { .. } => {
                AuthorizationErrorCode::UnauthorizedClient
            }
            AuthError::RateLimited { .. } | AuthError::Storage { .. } => {
                AuthorizationErrorCode::TemporarilyUnavailable
            }
            AuthError::Internal { .. } | AuthError::Configuration { .. } => {
                AuthorizationErrorCode::ServerError
            }
            _ => AuthorizationErrorCode::InvalidRequest,
        };
        let description = if error.is_server_error() {
            None
        } else {
            Some(error.to_string())
        };
        Self {
            error: code,
            error_description: description,
            state,
        }
    }

    /// Builds the redirect URL with error parameters.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error.as_str());
            if let Some(ref desc) = self.error_description {
                pairs.append_pair("error_description", desc);
            }
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Authorization error codes (RFC 6749 §4.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    /// The user did not prove control of a key.
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
}

impl AuthorizationErrorCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_request_deserialize() {
        let json = r#"{
            "response_type": "code",
            "client_id": "kgc_app",
            "redirect_uri": "https://app.example.com/callback",
            "scope": "openid profile",
            "state": "abc123xyz",
            "code_challenge": "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
            "code_challenge_method": "S256"
        }"#;

        let request: AuthorizationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.response_type, "code");
        assert_eq!(request.client_id, "kgc_app");
        assert_eq!(request.scope.as_deref(), Some("openid profile"));
        assert_eq!(request.code_challenge_method.as_deref(), Some("S256"));
    }

    #[test]
    fn test_response_redirect_url() {
        let response = AuthorizationResponse {
            code: "abc".to_string(),
            state: Some("xyz 1".to_string()),
            redirect_uri: "https://app.example.com/cb?keep=1".to_string(),
        };
        assert_eq!(
            response.to_redirect_url().unwrap(),
            "https://app.example.com/cb?keep=1&code=abc&state=xyz+1"
        );

        let stateless = AuthorizationResponse {
            state: None,
            ..response
        };
        assert!(!stateless.to_redirect_url().unwrap().contains("state="));
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (AuthError::invalid_scope("x"), AuthorizationErrorCode::InvalidScope),
            (AuthError::InvalidSignature, AuthorizationErrorCode::AccessDenied),
            (AuthError::ChallengeExpired, AuthorizationErrorCode::AccessDenied),
            (
                AuthError::unsupported_response_type("token"),
                AuthorizationErrorCode::UnsupportedResponseType,
            ),
            (AuthError::invalid_request("x"), AuthorizationErrorCode::InvalidRequest),
            (AuthError::internal("boom"), AuthorizationErrorCode::ServerError),
        ];
        for (error, expected) in cases {
            assert_eq!(AuthorizationError::from_auth_error(&error, None).error, expected);
        }
    }

    #[test]
    fn test_server_errors_hide_details() {
        let error = AuthorizationError::from_auth_error(
            &AuthError::internal("db password wrong"),
            Some("s".to_string()),
        );
        let url = error.to_redirect_url("https://app.example.com/cb").unwrap();
        assert_eq!(url, "https://app.example.com/cb?error=server_error&state=s");
    }
}
