//! Token service for issuing, rotating and checking tokens.
//!
//! This module handles the token half of the OAuth 2.0 flow:
//!
//! - Access token and refresh token issuance
//! - Refresh token rotation with reuse detection
//! - Revocation (RFC 7009) and introspection (RFC 7662)
//! - Access token validation for resource servers
//!
//! # Usage
//!
//! ```ignore
//! use keygate_auth::token::{TokenConfig, TokenService};
//!
//! let config = TokenConfig::from_oauth(&auth_config.oauth);
//! let service = TokenService::new(jwt, store, clients, limiter, audit, config);
//!
//! let pair = service.issue_token_pair(&user.id, &client.client_id, &scope).await?;
//! let claims = service.validate_access_token(&pair.access_token, None).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::introspection::{IntrospectionResponse, Requester, TokenTypeHint};
use super::jwt::{AccessTokenClaims, JwtError, JwtService};
use super::refresh::{RefreshTokenRecord, generate_token, hash_token};
use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::config::OAuthConfig;
use crate::oauth::client::ClientCredentials;
use crate::oauth::registry::ClientRegistry;
use crate::oauth::scope::ScopeSet;
use crate::ratelimit::{RateLimiter, RouteClass};
use crate::storage::{self, StateStore, keys};
use crate::{AuthError, AuthResult};

/// Attempts at marking a single family member revoked before giving up on it.
const REVOKE_ATTEMPTS: usize = 3;

/// Configuration for the token service.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Access token lifetime.
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime, counted from each rotation.
    pub refresh_token_lifetime: Duration,

    /// Whether to rotate refresh tokens on use.
    /// When false, the same refresh token stays valid until it expires.
    pub rotate_refresh_tokens: bool,

    /// Whether replaying a rotated refresh token revokes its whole family.
    pub reuse_detection: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::from_oauth(&OAuthConfig::default())
    }
}

impl TokenConfig {
    #[must_use]
    pub fn from_oauth(oauth: &OAuthConfig) -> Self {
        Self {
            access_token_lifetime: oauth.access_token_lifetime,
            refresh_token_lifetime: oauth.refresh_token_lifetime,
            rotate_refresh_tokens: oauth.refresh_token_rotation,
            reuse_detection: oauth.refresh_reuse_detection,
        }
    }

    /// Sets the access token lifetime.
    #[must_use]
    pub fn with_access_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.access_token_lifetime = lifetime;
        self
    }

    /// Sets whether to rotate refresh tokens on use.
    #[must_use]
    pub fn with_rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    /// Sets whether refresh token replay revokes the token family.
    #[must_use]
    pub fn with_reuse_detection(mut self, enabled: bool) -> Self {
        self.reuse_detection = enabled;
        self
    }
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Absent when a refresh did not rotate the refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Token service for generating and managing tokens.
pub struct TokenService {
    jwt: Arc<JwtService>,
    store: Arc<dyn StateStore>,
    clients: Arc<ClientRegistry>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    config: TokenConfig,
}

impl TokenService {
    #[must_use]
    pub fn new(
        jwt: Arc<JwtService>,
        store: Arc<dyn StateStore>,
        clients: Arc<ClientRegistry>,
        limiter: Arc<RateLimiter>,
        audit: Arc<AuditLog>,
        config: TokenConfig,
    ) -> Self {
        Self {
            jwt,
            store,
            clients,
            limiter,
            audit,
            config,
        }
    }

    /// Issues an access token and a refresh token starting a new family.
    pub async fn issue_token_pair(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
    ) -> AuthResult<TokenResponse> {
        let family_id = Uuid::new_v4().to_string();
        self.issue_in_family(user_id, client_id, scope, &family_id)
            .await
    }

    /// Issues a token pair whose refresh token roots the given family.
    pub(crate) async fn issue_in_family(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
        family_id: &str,
    ) -> AuthResult<TokenResponse> {
        let now = OffsetDateTime::now_utc();
        let refresh_token = generate_token();
        let record = RefreshTokenRecord {
            id: hash_token(&refresh_token),
            family_id: family_id.to_string(),
            parent_id: None,
            child_id: None,
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scope: scope.clone(),
            created_at: now,
            expires_at: now + to_time(self.config.refresh_token_lifetime),
            revoked: false,
            revoked_at: None,
        };
        self.store_refresh(&record).await?;

        let access_token = self.sign_access_token(user_id, client_id, scope, family_id, now)?;

        tracing::debug!(
            client_id = %client_id,
            family_id = %family_id,
            "Issued token pair"
        );

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_lifetime.as_secs(),
            refresh_token: Some(refresh_token),
            scope: scope.to_string(),
        })
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// With rotation on, the presented token is retired and a child token
    /// returned. Presenting a retired token again is treated as theft: the
    /// whole family is revoked, including access tokens minted from it.
    ///
    /// `requested_scope` may narrow the access token's scope. The rotated
    /// refresh token keeps the original scope.
    pub async fn refresh_token_pair(
        &self,
        refresh_token: &str,
        credentials: &ClientCredentials,
        requested_scope: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        self.limiter
            .check(RouteClass::Token, &credentials.client_id)
            .await?;
        let client = self.clients.authenticate(credentials).await?;

        let key = keys::refresh(&hash_token(refresh_token));
        let Some(current) =
            storage::load_json::<RefreshTokenRecord>(self.store.as_ref(), &key).await?
        else {
            return Err(self
                .refresh_failure(&client.client_id, "unknown refresh token")
                .await);
        };
        let record = &current.value;

        if record.client_id != client.client_id {
            return Err(self
                .refresh_failure(&client.client_id, "refresh token was issued to another client")
                .await);
        }
        if self.is_family_revoked(&record.family_id).await? {
            return Err(self
                .refresh_failure(&client.client_id, "refresh token family revoked")
                .await);
        }
        if record.revoked {
            if self.config.reuse_detection {
                self.handle_reuse(record).await?;
            }
            return Err(self
                .refresh_failure(&client.client_id, "refresh token revoked")
                .await);
        }

        let now = OffsetDateTime::now_utc();
        if record.is_expired(now) {
            return Err(self
                .refresh_failure(&client.client_id, "refresh token expired")
                .await);
        }

        let scope = match requested_scope.map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let requested = ScopeSet::parse(raw)?;
                if !requested.is_subset(&record.scope) {
                    return Err(AuthError::invalid_scope(format!(
                        "scope exceeds the original grant: {}",
                        requested.excess_over(&record.scope).join(" ")
                    )));
                }
                requested
            }
            _ => record.scope.clone(),
        };

        let rotated = if self.config.rotate_refresh_tokens {
            let new_token = generate_token();
            let child = RefreshTokenRecord {
                id: hash_token(&new_token),
                family_id: record.family_id.clone(),
                parent_id: Some(record.id.clone()),
                child_id: None,
                client_id: record.client_id.clone(),
                user_id: record.user_id.clone(),
                scope: record.scope.clone(),
                created_at: now,
                expires_at: now + to_time(self.config.refresh_token_lifetime),
                revoked: false,
                revoked_at: None,
            };
            let retired = RefreshTokenRecord {
                child_id: Some(child.id.clone()),
                ..record.revoked_copy(now)
            };

            if !storage::swap_json(self.store.as_ref(), &key, &current, &retired, None).await? {
                // Another request rotated this token first.
                if self.config.reuse_detection {
                    self.handle_reuse(record).await?;
                }
                return Err(self
                    .refresh_failure(&client.client_id, "refresh token already used")
                    .await);
            }
            self.store_refresh(&child).await?;
            Some(new_token)
        } else {
            None
        };

        let access_token = self.sign_access_token(
            &record.user_id,
            &record.client_id,
            &scope,
            &record.family_id,
            now,
        )?;

        tracing::info!(
            client_id = %record.client_id,
            family_id = %record.family_id,
            rotated = rotated.is_some(),
            "Refreshed access token"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::TokenRefreshed)
                    .subject(&record.user_id)
                    .client(&record.client_id)
                    .meta("family_id", record.family_id.as_str())
                    .meta("rotated", rotated.is_some()),
            )
            .await?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_lifetime.as_secs(),
            refresh_token: rotated,
            scope: scope.to_string(),
        })
    }

    /// Revokes an access or refresh token (RFC 7009).
    ///
    /// Revoking a refresh token revokes its whole family. Unknown, malformed
    /// and already expired tokens succeed without effect.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] when the requester neither owns
    /// the token's client nor is its resource owner.
    pub async fn revoke_token(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        requester: &Requester,
    ) -> AuthResult<()> {
        let handled = if hint == Some(TokenTypeHint::AccessToken) {
            self.revoke_access(token, requester).await?
                || self.revoke_refresh(token, requester).await?
        } else {
            self.revoke_refresh(token, requester).await?
                || self.revoke_access(token, requester).await?
        };

        if !handled {
            tracing::debug!(requester = %requester.label(), "Revocation of unknown token ignored");
        }
        Ok(())
    }

    /// Describes a token (RFC 7662).
    ///
    /// Claims are only returned to the client the token was issued to or to
    /// its resource owner. Everyone else gets `{"active": false}`.
    pub async fn introspect(
        &self,
        token: &str,
        requester: &Requester,
    ) -> AuthResult<IntrospectionResponse> {
        match self.validate_access_token(token, None).await {
            Ok(claims) => {
                if !requester.owns(&claims.client_id, &claims.sub) {
                    self.audit_introspection_denied(requester, &claims.client_id)
                        .await;
                    return Ok(IntrospectionResponse::inactive());
                }
                return Ok(IntrospectionResponse {
                    active: true,
                    scope: Some(claims.scope),
                    client_id: Some(claims.client_id),
                    sub: Some(claims.sub),
                    aud: Some(claims.aud),
                    iss: Some(claims.iss),
                    exp: Some(claims.exp),
                    iat: Some(claims.iat),
                    jti: Some(claims.jti),
                    token_type: Some("Bearer".to_string()),
                });
            }
            Err(e) if e.is_server_error() => return Err(e),
            Err(_) => {}
        }

        let Some(record) = self.load_refresh(token).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        let now = OffsetDateTime::now_utc();
        if record.revoked
            || record.is_expired(now)
            || self.is_family_revoked(&record.family_id).await?
        {
            return Ok(IntrospectionResponse::inactive());
        }
        if !requester.owns(&record.client_id, &record.user_id) {
            self.audit_introspection_denied(requester, &record.client_id)
                .await;
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(record.scope.to_string()),
            client_id: Some(record.client_id),
            sub: Some(record.user_id),
            aud: None,
            iss: Some(self.jwt.issuer().to_string()),
            exp: Some(record.expires_at.unix_timestamp()),
            iat: Some(record.created_at.unix_timestamp()),
            jti: None,
            token_type: Some("refresh_token".to_string()),
        })
    }

    /// Validates an access token for a resource server.
    ///
    /// Checks the signature, issuer and expiry, then the audience when one is
    /// expected, then the revocation markers for the token and its family.
    /// An expired token reports [`AuthError::TokenExpired`] even though its
    /// signature is intact.
    pub async fn validate_access_token(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> AuthResult<AccessTokenClaims> {
        let claims = self.jwt.decode::<AccessTokenClaims>(token)?.claims;

        if let Some(audience) = expected_audience {
            if claims.aud != audience {
                return Err(AuthError::invalid_token("audience mismatch"));
            }
        }
        if self
            .store
            .get(&keys::revoked_jti(&claims.jti))
            .await?
            .is_some()
        {
            return Err(AuthError::TokenRevoked);
        }
        if self.is_family_revoked(&claims.fid).await? {
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Revokes every token in the family `record` belongs to.
    ///
    /// Writes the family marker first, which invalidates access tokens and
    /// refresh tokens alike, then walks parent and child pointers marking
    /// each stored refresh token revoked. Returns the number of records
    /// newly marked.
    pub(crate) async fn revoke_family(&self, record: &RefreshTokenRecord) -> AuthResult<usize> {
        self.mark_family_revoked(&record.family_id).await?;
        let now = OffsetDateTime::now_utc();

        let mut pending = vec![record.id.clone()];
        let mut visited = HashSet::new();
        let mut revoked = 0;

        while let Some(id) = pending.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let key = keys::refresh(&id);
            for _ in 0..REVOKE_ATTEMPTS {
                let Some(current) =
                    storage::load_json::<RefreshTokenRecord>(self.store.as_ref(), &key).await?
                else {
                    break;
                };
                if current.value.family_id != record.family_id {
                    break;
                }
                pending.extend(current.value.parent_id.iter().cloned());
                pending.extend(current.value.child_id.iter().cloned());
                if current.value.revoked {
                    break;
                }
                let updated = current.value.revoked_copy(now);
                if storage::swap_json(self.store.as_ref(), &key, &current, &updated, None).await? {
                    revoked += 1;
                    break;
                }
            }
        }

        Ok(revoked)
    }

    /// Writes the family revocation marker.
    ///
    /// The marker outlives every member: none can have been issued later
    /// than now, and none lives longer than the refresh token lifetime.
    pub(crate) async fn mark_family_revoked(&self, family_id: &str) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        self.store
            .put(
                &keys::revoked_family(family_id),
                now.unix_timestamp().to_string().as_bytes(),
                Some(self.config.refresh_token_lifetime.max(self.config.access_token_lifetime)),
            )
            .await
    }

    #[must_use]
    pub fn jwt_service(&self) -> &Arc<JwtService> {
        &self.jwt
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    async fn handle_reuse(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        let revoked = self.revoke_family(record).await?;
        tracing::warn!(
            client_id = %record.client_id,
            family_id = %record.family_id,
            revoked = revoked,
            "Refresh token reuse detected, token family revoked"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::RefreshReuseDetected)
                    .subject(&record.user_id)
                    .client(&record.client_id)
                    .failure("rotated refresh token presented again")
                    .meta("family_id", record.family_id.as_str())
                    .meta("revoked_tokens", revoked),
            )
            .await?;
        Ok(())
    }

    async fn revoke_refresh(&self, token: &str, requester: &Requester) -> AuthResult<bool> {
        let Some(record) = self.load_refresh(token).await? else {
            return Ok(false);
        };
        if !requester.owns(&record.client_id, &record.user_id) {
            return Err(self.revocation_denied(requester, &record.client_id).await);
        }

        self.revoke_family(&record).await?;
        tracing::info!(
            client_id = %record.client_id,
            family_id = %record.family_id,
            "Revoked refresh token family"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::TokenRevoked)
                    .subject(&record.user_id)
                    .client(&record.client_id)
                    .meta("token_type", "refresh_token")
                    .meta("family_id", record.family_id.as_str()),
            )
            .await?;
        Ok(true)
    }

    async fn revoke_access(&self, token: &str, requester: &Requester) -> AuthResult<bool> {
        let claims = match self.jwt.decode::<AccessTokenClaims>(token) {
            Ok(data) => data.claims,
            // Nothing left to revoke.
            Err(JwtError::Expired) => return Ok(true),
            Err(_) => return Ok(false),
        };
        if !requester.owns(&claims.client_id, &claims.sub) {
            return Err(self.revocation_denied(requester, &claims.client_id).await);
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let remaining = u64::try_from(claims.exp.saturating_sub(now)).unwrap_or(0);
        self.store
            .put(
                &keys::revoked_jti(&claims.jti),
                now.to_string().as_bytes(),
                Some(Duration::from_secs(remaining.max(1)) + self.jwt_leeway()),
            )
            .await?;

        tracing::info!(client_id = %claims.client_id, jti = %claims.jti, "Revoked access token");
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::TokenRevoked)
                    .subject(&claims.sub)
                    .client(&claims.client_id)
                    .meta("token_type", "access_token")
                    .meta("jti", claims.jti.as_str()),
            )
            .await?;
        Ok(true)
    }

    fn sign_access_token(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &ScopeSet,
        family_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<String> {
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            exp: (now + to_time(self.config.access_token_lifetime)).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            client_id: client_id.to_string(),
            fid: family_id.to_string(),
        };
        Ok(self.jwt.encode(&claims)?)
    }

    async fn store_refresh(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        let inserted = storage::insert_json(
            self.store.as_ref(),
            &keys::refresh(&record.id),
            record,
            Some(self.config.refresh_token_lifetime),
        )
        .await?;
        if inserted {
            Ok(())
        } else {
            Err(AuthError::internal("refresh token collision"))
        }
    }

    async fn load_refresh(&self, token: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        Ok(storage::load_json::<RefreshTokenRecord>(
            self.store.as_ref(),
            &keys::refresh(&hash_token(token)),
        )
        .await?
        .map(|v| v.value))
    }

    async fn is_family_revoked(&self, family_id: &str) -> AuthResult<bool> {
        Ok(self
            .store
            .get(&keys::revoked_family(family_id))
            .await?
            .is_some())
    }

    fn jwt_leeway(&self) -> Duration {
        self.jwt.clock_skew()
    }

    async fn refresh_failure(&self, client_id: &str, reason: &str) -> AuthError {
        tracing::debug!(client_id = %client_id, reason = reason, "Refresh rejected");
        let _ = self
            .audit
            .record(
                AuditEventBuilder::new(AuditAction::RefreshFailed)
                    .client(client_id)
                    .failure(reason),
            )
            .await;
        AuthError::invalid_grant(reason)
    }

    async fn revocation_denied(&self, requester: &Requester, client_id: &str) -> AuthError {
        let _ = self
            .audit
            .record(
                AuditEventBuilder::new(AuditAction::TokenRevoked)
                    .client(client_id)
                    .failure("requester does not own the token")
                    .meta("requester", requester.label()),
            )
            .await;
        AuthError::unauthorized("token belongs to another client")
    }

    async fn audit_introspection_denied(&self, requester: &Requester, client_id: &str) {
        let _ = self
            .audit
            .record(
                AuditEventBuilder::new(AuditAction::IntrospectionDenied)
                    .client(client_id)
                    .failure("requester does not own the token")
                    .meta("requester", requester.label()),
            )
            .await;
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSeverity;
    use crate::audit::test_support::RecordingSink;
    use crate::config::RateLimitingConfig;
    use crate::oauth::client::{ClientMetadata, ClientType};
    use crate::storage::MemoryStateStore;
    use crate::token::jwt::SigningKey;
    use tokio::task::JoinSet;

    const USER: &str = "02a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

    struct Fixture {
        tokens: Arc<TokenService>,
        sink: Arc<RecordingSink>,
        client_id: String,
        other_client_id: String,
    }

    impl Fixture {
        fn creds(&self) -> ClientCredentials {
            ClientCredentials::public(&self.client_id)
        }

        fn scope(&self) -> ScopeSet {
            ScopeSet::parse("openid profile").unwrap()
        }
    }

    async fn fixture_with(config: TokenConfig) -> Fixture {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let sink = Arc::new(RecordingSink::default());
        let audit = Arc::new(AuditLog::new(sink.clone(), false));
        let clients = Arc::new(ClientRegistry::new(
            store.clone(),
            audit.clone(),
            ScopeSet::parse("openid profile offline_access").unwrap(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            audit.clone(),
            RateLimitingConfig::default(),
        ));
        let key = SigningKey::hmac(b"0123456789abcdef0123456789abcdef", None).unwrap();
        let jwt = Arc::new(JwtService::new(
            key,
            "https://id.example",
            Duration::from_secs(5),
        ));

        let mut ids = Vec::new();
        for name in ["App", "Other"] {
            let registered = clients
                .register(ClientMetadata {
                    name: name.to_string(),
                    client_type: ClientType::Public,
                    redirect_uris: vec!["https://app.example/cb".to_string()],
                    scope: None,
                })
                .await
                .unwrap();
            ids.push(registered.client_id);
        }

        let tokens = Arc::new(TokenService::new(
            jwt, store, clients, limiter, audit, config,
        ));
        Fixture {
            tokens,
            sink,
            other_client_id: ids.pop().unwrap(),
            client_id: ids.pop().unwrap(),
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(TokenConfig::default()).await
    }

    #[tokio::test]
    async fn test_issue_token_pair_claims() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);
        assert_eq!(pair.scope, "openid profile");
        assert_eq!(pair.refresh_token.as_ref().unwrap().len(), 43);

        let claims = fx
            .tokens
            .validate_access_token(&pair.access_token, Some(&fx.client_id))
            .await
            .unwrap();
        assert_eq!(claims.sub, USER);
        assert_eq!(claims.aud, fx.client_id);
        assert_eq!(claims.scope, "openid profile");
        assert_eq!(claims.iss, "https://id.example");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(!claims.jti.is_empty());
    }

    #[tokio::test]
    async fn test_audience_mismatch() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();

        let err = fx
            .tokens
            .validate_access_token(&pair.access_token, Some(&fx.other_client_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn test_expired_token_reports_expiry() {
        let fx = fixture().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = fx
            .tokens
            .jwt_service()
            .encode(&AccessTokenClaims {
                iss: "https://id.example".to_string(),
                sub: USER.to_string(),
                aud: fx.client_id.clone(),
                exp: now - 120,
                iat: now - 3720,
                jti: "old".to_string(),
                scope: "openid".to_string(),
                client_id: fx.client_id.clone(),
                fid: "family".to_string(),
            })
            .unwrap();

        let err = fx
            .tokens
            .validate_access_token(&token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();
        let first = pair.refresh_token.unwrap();

        let refreshed = fx
            .tokens
            .refresh_token_pair(&first, &fx.creds(), None)
            .await
            .unwrap();
        let second = refreshed.refresh_token.clone().unwrap();
        assert_ne!(first, second);
        assert_ne!(pair.access_token, refreshed.access_token);

        fx.tokens
            .refresh_token_pair(&second, &fx.creds(), None)
            .await
            .unwrap();
        assert!(fx.sink.actions().contains(&AuditAction::TokenRefreshed));
    }

    #[tokio::test]
    async fn test_refresh_reuse_revokes_family() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();
        let a = pair.refresh_token.unwrap();
        let rotated = fx
            .tokens
            .refresh_token_pair(&a, &fx.creds(), None)
            .await
            .unwrap();
        let b = rotated.refresh_token.unwrap();

        let replay = fx
            .tokens
            .refresh_token_pair(&a, &fx.creds(), None)
            .await
            .unwrap_err();
        assert!(matches!(replay, AuthError::InvalidGrant { .. }));

        // The legitimate successor dies with the family.
        let successor = fx
            .tokens
            .refresh_token_pair(&b, &fx.creds(), None)
            .await
            .unwrap_err();
        assert!(matches!(successor, AuthError::InvalidGrant { .. }));

        for access in [&pair.access_token, &rotated.access_token] {
            let err = fx
                .tokens
                .validate_access_token(access, None)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::TokenRevoked));
        }

        let reuse = fx
            .sink
            .events()
            .into_iter()
            .find(|e| e.action == AuditAction::RefreshReuseDetected)
            .expect("reuse audited");
        assert_eq!(reuse.severity, AuditSeverity::Critical);
        assert_eq!(reuse.client_id.as_deref(), Some(fx.client_id.as_str()));
    }

    #[tokio::test]
    async fn test_reuse_detection_disabled_keeps_family() {
        let fx = fixture_with(TokenConfig::default().with_reuse_detection(false)).await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();
        let a = pair.refresh_token.unwrap();
        let b = fx
            .tokens
            .refresh_token_pair(&a, &fx.creds(), None)
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        assert!(
            fx.tokens
                .refresh_token_pair(&a, &fx.creds(), None)
                .await
                .is_err()
        );
        fx.tokens
            .refresh_token_pair(&b, &fx.creds(), None)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_one_winner() {
        let fx = fixture().await;
        let refresh = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let tokens = fx.tokens.clone();
            let creds = fx.creds();
            let refresh = refresh.clone();
            tasks.spawn(async move { tokens.refresh_token_pair(&refresh, &creds, None).await });
        }

        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, AuthError::InvalidGrant { .. }), "{e:?}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_refresh_scope_narrowing() {
        let fx = fixture().await;
        let refresh = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        let err = fx
            .tokens
            .refresh_token_pair(&refresh, &fx.creds(), Some("openid offline_access"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidScope { .. }));

        let narrowed = fx
            .tokens
            .refresh_token_pair(&refresh, &fx.creds(), Some("openid"))
            .await
            .unwrap();
        assert_eq!(narrowed.scope, "openid");

        // The rotated refresh token keeps the full grant.
        let widened_again = fx
            .tokens
            .refresh_token_pair(narrowed.refresh_token.as_deref().unwrap(), &fx.creds(), None)
            .await
            .unwrap();
        assert_eq!(widened_again.scope, "openid profile");
    }

    #[tokio::test]
    async fn test_refresh_rejects_foreign_client() {
        let fx = fixture().await;
        let refresh = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        let err = fx
            .tokens
            .refresh_token_pair(
                &refresh,
                &ClientCredentials::public(&fx.other_client_id),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        // The rightful client is unaffected.
        fx.tokens
            .refresh_token_pair(&refresh, &fx.creds(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let fx = fixture_with(TokenConfig::default().with_rotate_refresh_tokens(false)).await;
        let refresh = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        for _ in 0..2 {
            let response = fx
                .tokens
                .refresh_token_pair(&refresh, &fx.creds(), None)
                .await
                .unwrap();
            assert!(response.refresh_token.is_none());
        }
    }

    #[tokio::test]
    async fn test_revoke_access_token() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();
        let owner = Requester::Client(fx.client_id.clone());

        let err = fx
            .tokens
            .revoke_token(
                &pair.access_token,
                Some(TokenTypeHint::AccessToken),
                &Requester::Client(fx.other_client_id.clone()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized { .. }));

        fx.tokens
            .revoke_token(&pair.access_token, Some(TokenTypeHint::AccessToken), &owner)
            .await
            .unwrap();

        let err = fx
            .tokens
            .validate_access_token(&pair.access_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
        assert!(!fx.tokens.introspect(&pair.access_token, &owner).await.unwrap().active);

        // The refresh token of the same family survives access token revocation.
        fx.tokens
            .refresh_token_pair(pair.refresh_token.as_deref().unwrap(), &fx.creds(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_revoke_refresh_token_revokes_family() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();
        let refresh = pair.refresh_token.unwrap();

        // Resource owners may revoke their own grants.
        fx.tokens
            .revoke_token(&refresh, None, &Requester::ResourceOwner(USER.to_string()))
            .await
            .unwrap();

        assert!(matches!(
            fx.tokens.refresh_token_pair(&refresh, &fx.creds(), None).await,
            Err(AuthError::InvalidGrant { .. })
        ));
        assert!(matches!(
            fx.tokens.validate_access_token(&pair.access_token, None).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_revoke_unknown_token_succeeds() {
        let fx = fixture().await;
        fx.tokens
            .revoke_token(
                "not-a-token",
                Some(TokenTypeHint::RefreshToken),
                &Requester::Client(fx.client_id.clone()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_introspection_visibility() {
        let fx = fixture().await;
        let pair = fx
            .tokens
            .issue_token_pair(USER, &fx.client_id, &fx.scope())
            .await
            .unwrap();

        let owner = fx
            .tokens
            .introspect(&pair.access_token, &Requester::Client(fx.client_id.clone()))
            .await
            .unwrap();
        assert!(owner.active);
        assert_eq!(owner.sub.as_deref(), Some(USER));
        assert_eq!(owner.scope.as_deref(), Some("openid profile"));

        let resource_owner = fx
            .tokens
            .introspect(&pair.access_token, &Requester::ResourceOwner(USER.to_string()))
            .await
            .unwrap();
        assert!(resource_owner.active);

        let stranger = fx
            .tokens
            .introspect(
                &pair.access_token,
                &Requester::Client(fx.other_client_id.clone()),
            )
            .await
            .unwrap();
        assert_eq!(stranger, IntrospectionResponse::inactive());
        assert!(fx.sink.actions().contains(&AuditAction::IntrospectionDenied));

        let refresh = fx
            .tokens
            .introspect(
                pair.refresh_token.as_deref().unwrap(),
                &Requester::Client(fx.client_id.clone()),
            )
            .await
            .unwrap();
        assert!(refresh.active);
        assert_eq!(refresh.token_type.as_deref(), Some("refresh_token"));

        let garbage = fx
            .tokens
            .introspect("garbage", &Requester::Client(fx.client_id.clone()))
            .await
            .unwrap();
        assert!(!garbage.active);
    }
}
