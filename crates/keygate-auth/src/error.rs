//! Error types shared by every Keygate component.
//!
//! Each variant maps to a stable machine-readable code (see
//! [`AuthError::error_code`]) so HTTP clients can branch on it without
//! parsing messages.

use std::fmt;
use std::time::Duration;

/// Errors raised by the challenge, identity, OAuth and token components.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing request parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// Unknown client or failed client authentication.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// Authorization code or refresh token is missing, expired, used or mismatched.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The requested scope exceeds what the client may ask for.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of the scope problem.
        message: String,
    },

    /// A well-formed signature that was not produced by the claimed key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The login challenge passed its expiry before it was answered.
    #[error("Challenge expired")]
    ChallengeExpired,

    /// The single-use resource was already used by another request.
    #[error("Already consumed: {message}")]
    AlreadyConsumed {
        /// Which resource lost the race.
        message: String,
    },

    /// The subject exceeded its request budget for the current window.
    #[error("Rate limited: retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Time until the window resets.
        retry_after: Duration,
        /// Configured request budget.
        limit: u64,
        /// Unix timestamp of the window reset.
        reset_at: i64,
    },

    /// The caller is not the owning client or resource owner.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The access token is malformed or carries a bad signature.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The access token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The token was explicitly revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// The response type is not supported.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The grant type is not supported.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The shared state store is unreachable or returned an error.
    #[error("Storage error: {message}")]
    Storage {
        /// Backend error description.
        message: String,
    },

    /// Keys or settings are invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// Unexpected failure (crypto backend, serialization, fail-closed audit).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an invalid client error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates an invalid grant error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates an invalid scope error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates an already consumed error.
    #[must_use]
    pub fn already_consumed(message: impl Into<String>) -> Self {
        Self::AlreadyConsumed {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates an invalid token error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates an unsupported response type error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates an unsupported grant type error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller is at fault (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if the server or one of its backends is at fault (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if retrying later with backoff may succeed.
    ///
    /// Single-use operations are never retried by Keygate itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Internal { .. } | Self::RateLimited { .. }
        )
    }

    /// Returns `true` for errors about access token validity.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. } | Self::TokenExpired | Self::TokenRevoked
        )
    }

    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::InvalidGrant { .. } => ErrorCategory::Authentication,
            Self::InvalidScope { .. } => ErrorCategory::Authorization,
            Self::InvalidSignature => ErrorCategory::Authentication,
            Self::ChallengeExpired => ErrorCategory::Authentication,
            Self::AlreadyConsumed { .. } => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::Throttling,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::TokenExpired => ErrorCategory::Token,
            Self::TokenRevoked => ErrorCategory::Token,
            Self::UnsupportedResponseType { .. } => ErrorCategory::Validation,
            Self::UnsupportedGrantType { .. } => ErrorCategory::Validation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable machine-readable error code.
    ///
    /// OAuth endpoint errors use the RFC 6749 codes; the keypair login
    /// errors have Keygate-specific codes.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidSignature => "invalid_signature",
            Self::ChallengeExpired => "challenge_expired",
            Self::AlreadyConsumed { .. } => "already_consumed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized_client",
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::Storage { .. } => "temporarily_unavailable",
            Self::Configuration { .. } | Self::Internal { .. } => "server_error",
        }
    }
}

/// Coarse error categories, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller identity could not be established.
    Authentication,
    /// Caller identity is known but not allowed.
    Authorization,
    /// Token problems.
    Token,
    /// Request shape problems.
    Validation,
    /// Request budget exhausted.
    Throttling,
    /// Store outages.
    Infrastructure,
    /// Misconfiguration.
    Configuration,
    /// Everything else.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Token => "token",
            Self::Validation => "validation",
            Self::Throttling => "throttling",
            Self::Infrastructure => "infrastructure",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {err}"))
    }
}
