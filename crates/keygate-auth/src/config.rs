//! Engine configuration.
//!
//! All durations accept humantime strings (`"10m"`, `"30d"`) when read from
//! TOML or environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ratelimit::RouteClass;

/// Root configuration for the authentication and token engine.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://id.example.com"
///
/// [auth.oauth]
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "30d"
///
/// [auth.signing]
/// algorithm = "HS256"
/// secret = "change-me-to-at-least-32-bytes-of-entropy"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public base URL. Used as the token `iss` claim and to build callback URLs.
    pub issuer: String,

    /// OAuth 2.0 settings.
    pub oauth: OAuthConfig,

    /// Login challenge settings.
    pub challenge: ChallengeConfig,

    /// Access token signing.
    pub signing: SigningConfig,

    /// Per-route request budgets.
    pub rate_limiting: RateLimitingConfig,

    /// Audit trail behaviour.
    pub audit: AuditConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            oauth: OAuthConfig::default(),
            challenge: ChallengeConfig::default(),
            signing: SigningConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// OAuth 2.0 configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime. Capped at 10 minutes.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Issue a new refresh token on every refresh and revoke the old one.
    pub refresh_token_rotation: bool,

    /// Revoke the whole token family when a rotated refresh token is replayed.
    pub refresh_reuse_detection: bool,

    /// Require PKCE for confidential clients too. Public clients always need it.
    pub require_pkce_for_confidential: bool,

    /// Scopes clients may register for.
    pub supported_scopes: Vec<String>,

    /// Enabled grant types: "authorization_code" and "refresh_token".
    pub grant_types: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(600), // 10 minutes
            access_token_lifetime: Duration::from_secs(3600),      // 1 hour
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600), // 30 days
            refresh_token_rotation: true,
            refresh_reuse_detection: true,
            require_pkce_for_confidential: true,
            supported_scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "offline_access".to_string(),
            ],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
        }
    }
}

/// Login challenge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// How long a k1 challenge may be answered.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

/// Access token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// JWT algorithm: HS256, RS256 or ES384.
    pub algorithm: String,

    /// Shared secret for HS256.
    pub secret: Option<String>,

    /// PEM private key for RS256/ES384. A fresh keypair is generated when unset.
    pub private_key_path: Option<PathBuf>,

    /// Key id published in the JWKS. Derived from the key when unset.
    pub key_id: Option<String>,

    /// Tolerated clock difference when checking `exp`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "ES384".to_string(),
            secret: None,
            private_key_path: None,
            key_id: None,
            clock_skew: Duration::from_secs(5),
        }
    }
}

/// Fixed-window request budgets, one per route class.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Turn admission control off entirely.
    pub enabled: bool,

    /// Window length shared by all classes.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Challenge creation, per client address.
    pub challenge: u64,

    /// Challenge verification, per client address.
    pub verify: u64,

    /// Authorization requests, per client id.
    pub authorize: u64,

    /// Token endpoint, per client id.
    pub token: u64,

    /// Client registration, per client address.
    pub register: u64,

    /// Introspection, per caller.
    pub introspect: u64,

    /// Revocation, per caller.
    pub revoke: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            challenge: 30,
            verify: 30,
            authorize: 30,
            token: 60,
            register: 10,
            introspect: 120,
            revoke: 60,
        }
    }
}

impl RateLimitingConfig {
    /// Returns the budget configured for a route class.
    #[must_use]
    pub fn limit_for(&self, class: RouteClass) -> u64 {
        match class {
            RouteClass::Challenge => self.challenge,
            RouteClass::Verify => self.verify,
            RouteClass::Authorize => self.authorize,
            RouteClass::Token => self.token,
            RouteClass::Register => self.register,
            RouteClass::Introspect => self.introspect,
            RouteClass::Revoke => self.revoke,
        }
    }
}

/// Where audit events are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured log lines on the `keygate::audit` target.
    #[default]
    Tracing,
    /// Append-only records in the shared state store.
    Store,
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Sink selection.
    pub sink: AuditSinkKind,

    /// Fail the primary operation when the audit write fails.
    pub fail_closed: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Tracing,
            fail_closed: false,
        }
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range or a required setting is missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }
        if url::Url::parse(&self.issuer).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "issuer must be an absolute URL, got '{}'",
                self.issuer
            )));
        }

        match self.signing.algorithm.as_str() {
            "HS256" => match &self.signing.secret {
                Some(secret) if secret.len() >= 32 => {}
                Some(_) => {
                    return Err(ConfigError::InvalidValue(
                        "HS256 secret must be at least 32 bytes".to_string(),
                    ));
                }
                None => return Err(ConfigError::Missing("signing.secret".to_string())),
            },
            "RS256" | "ES384" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be HS256, RS256, or ES384",
                    other
                )));
            }
        }

        if self.oauth.authorization_code_lifetime.is_zero()
            || self.oauth.authorization_code_lifetime > Duration::from_secs(600)
        {
            return Err(ConfigError::InvalidValue(
                "authorization_code_lifetime must be between 1s and 10m".to_string(),
            ));
        }
        if self.oauth.access_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime must be > 0".to_string(),
            ));
        }
        if self.oauth.refresh_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "refresh_token_lifetime must be > 0".to_string(),
            ));
        }
        if self.challenge.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "challenge.ttl must be > 0".to_string(),
            ));
        }

        for grant in &self.oauth.grant_types {
            match grant.as_str() {
                "authorization_code" | "refresh_token" => {}
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid grant type: '{}'. Must be authorization_code or refresh_token",
                        other
                    )));
                }
            }
        }

        if self.rate_limiting.enabled && self.rate_limiting.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "rate_limiting.window must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value is out of range or malformed.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required setting is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
