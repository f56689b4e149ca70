//! Authorization code grant.
//!
//! [`AuthorizationService::authorize`] turns a verified login challenge into
//! a one-time code bound to the client, redirect URI, scope and PKCE
//! challenge. [`AuthorizationService::exchange_code`] redeems the code for
//! tokens. Every check runs before the code is marked used, so a rejected
//! exchange leaves the code redeemable, and the used flag flips through a
//! compare-and-swap so concurrent exchanges have exactly one winner.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::authorize::{AuthorizationRequest, AuthorizationResponse};
use super::client::{Client, ClientCredentials};
use super::code::AuthorizationCode;
use super::pkce::{PkceChallenge, PkceMethod, PkceVerifier};
use super::registry::ClientRegistry;
use super::scope::ScopeSet;
use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::challenge::ChallengeManager;
use crate::config::OAuthConfig;
use crate::ratelimit::{RateLimiter, RouteClass};
use crate::storage::{self, StateStore, keys};
use crate::token::refresh::{generate_token, hash_token};
use crate::token::{TokenResponse, TokenService};
use crate::{AuthError, AuthResult};

/// How long code records stay readable after they expire.
const EXPIRED_RETENTION: Duration = Duration::from_secs(60);

/// Presentations of a used code this soon after its redemption are treated
/// as losers of a concurrent exchange and do not revoke the issued tokens.
pub const CONCURRENT_EXCHANGE_GRACE: Duration = Duration::from_secs(1);

/// Settings for the authorization code grant.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    pub code_lifetime: Duration,
    pub require_pkce_for_confidential: bool,
}

impl AuthorizationConfig {
    #[must_use]
    pub fn from_oauth(oauth: &OAuthConfig) -> Self {
        Self {
            code_lifetime: oauth.authorization_code_lifetime,
            require_pkce_for_confidential: oauth.require_pkce_for_confidential,
        }
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self::from_oauth(&OAuthConfig::default())
    }
}

/// Proof that the user controls a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginProof {
    /// Session of a challenge in the `Verified` state, or one the signature
    /// below verifies.
    pub session_id: String,
    pub signed: Option<SignedLogin>,
}

impl LoginProof {
    /// A challenge already verified out of band, e.g. by the wallet callback.
    #[must_use]
    pub fn verified(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            signed: None,
        }
    }

    /// A challenge answered inline with the authorization request.
    #[must_use]
    pub fn signed(session_id: impl Into<String>, signed: SignedLogin) -> Self {
        Self {
            session_id: session_id.into(),
            signed: Some(signed),
        }
    }
}

/// A k1 signature presented with the authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLogin {
    pub k1: String,
    pub public_key: String,
    pub signature: String,
}

/// Token endpoint parameters for `grant_type=authorization_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: Option<String>,
}

/// Issues and redeems authorization codes.
pub struct AuthorizationService {
    store: Arc<dyn StateStore>,
    clients: Arc<ClientRegistry>,
    challenges: Arc<ChallengeManager>,
    tokens: Arc<TokenService>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    config: AuthorizationConfig,
}

impl AuthorizationService {
    pub fn new(
        store: Arc<dyn StateStore>,
        clients: Arc<ClientRegistry>,
        challenges: Arc<ChallengeManager>,
        tokens: Arc<TokenService>,
        limiter: Arc<RateLimiter>,
        audit: Arc<AuditLog>,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            store,
            clients,
            challenges,
            tokens,
            limiter,
            audit,
            config,
        }
    }

    /// Looks up the client and checks the redirect URI against its
    /// registration. Until this succeeds, errors must not be redirected.
    pub async fn validate_client_redirect(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> AuthResult<Client> {
        let client = self
            .clients
            .find(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;
        if !client.is_redirect_uri_allowed(redirect_uri) {
            return Err(AuthError::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }
        Ok(client)
    }

    /// Handles an authorization request.
    ///
    /// The request is validated in full before the login challenge is
    /// consumed, so a malformed request does not burn the user's login.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        login: &LoginProof,
    ) -> AuthResult<AuthorizationResponse> {
        self.limiter
            .check(RouteClass::Authorize, &request.client_id)
            .await?;

        match self.try_authorize(request, login).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::debug!(client_id = %request.client_id, error = %e, "Authorization denied");
                let _ = self
                    .audit
                    .record(
                        AuditEventBuilder::new(AuditAction::AuthorizationDenied)
                            .client(&request.client_id)
                            .failure(e.to_string())
                            .meta("error", e.error_code()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Redeems an authorization code.
    ///
    /// Missing, expired and used codes, client mismatches, redirect URI
    /// mismatches and PKCE failures all report `invalid_grant`. Replaying a
    /// redeemed code revokes the tokens it produced.
    pub async fn exchange_code(
        &self,
        exchange: &CodeExchange,
        credentials: &ClientCredentials,
    ) -> AuthResult<TokenResponse> {
        self.limiter
            .check(RouteClass::Token, &credentials.client_id)
            .await?;

        match self.try_exchange(exchange, credentials).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if !e.is_server_error() {
                    let _ = self
                        .audit
                        .record(
                            AuditEventBuilder::new(AuditAction::CodeExchangeFailed)
                                .client(&credentials.client_id)
                                .failure(e.to_string()),
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn try_authorize(
        &self,
        request: &AuthorizationRequest,
        login: &LoginProof,
    ) -> AuthResult<AuthorizationResponse> {
        let client = self
            .validate_client_redirect(&request.client_id, &request.redirect_uri)
            .await?;

        if request.response_type != "code" {
            return Err(AuthError::unsupported_response_type(
                &request.response_type,
            ));
        }

        let scope = match request.scope.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let requested = ScopeSet::parse(raw)?;
                if !requested.is_subset(&client.scopes) {
                    return Err(AuthError::invalid_scope(format!(
                        "scope not allowed for this client: {}",
                        requested.excess_over(&client.scopes).join(" ")
                    )));
                }
                requested
            }
            _ => client.scopes.clone(),
        };

        let code_challenge = match &request.code_challenge {
            Some(challenge) => {
                PkceMethod::parse(request.code_challenge_method.as_deref().unwrap_or("S256"))?;
                Some(PkceChallenge::new(challenge.as_str())?)
            }
            None if !client.is_confidential() || self.config.require_pkce_for_confidential => {
                return Err(AuthError::invalid_request("code_challenge is required"));
            }
            None => None,
        };

        if let Some(signed) = &login.signed {
            self.challenges
                .verify_challenge(
                    &login.session_id,
                    &signed.k1,
                    &signed.public_key,
                    &signed.signature,
                )
                .await?;
        }
        let user = self.challenges.consume_challenge(&login.session_id).await?;

        let now = OffsetDateTime::now_utc();
        let code = generate_token();
        let record = AuthorizationCode {
            client_id: client.client_id.clone(),
            user_id: user.id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope,
            code_challenge,
            created_at: now,
            expires_at: now + self.config.code_lifetime,
            used: false,
            family_id: None,
            redeemed_at: None,
        };
        let inserted = storage::insert_json(
            self.store.as_ref(),
            &keys::code(&hash_token(&code)),
            &record,
            Some(self.config.code_lifetime + EXPIRED_RETENTION),
        )
        .await?;
        if !inserted {
            return Err(AuthError::internal("authorization code collision"));
        }

        tracing::info!(
            client_id = %client.client_id,
            user_id = %user.id,
            scope = %record.scope,
            "Issued authorization code"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::AuthorizationGranted)
                    .subject(&user.id)
                    .client(&client.client_id)
                    .meta("scope", record.scope.to_string()),
            )
            .await?;

        Ok(AuthorizationResponse {
            code,
            state: request.state.clone(),
            redirect_uri: request.redirect_uri.clone(),
        })
    }

    async fn try_exchange(
        &self,
        exchange: &CodeExchange,
        credentials: &ClientCredentials,
    ) -> AuthResult<TokenResponse> {
        let key = keys::code(&hash_token(&exchange.code));
        let Some(current) =
            storage::load_json::<AuthorizationCode>(self.store.as_ref(), &key).await?
        else {
            return Err(AuthError::invalid_grant("unknown authorization code"));
        };
        let record = &current.value;

        if record.used {
            if record.raced_redemption(OffsetDateTime::now_utc(), CONCURRENT_EXCHANGE_GRACE) {
                return Err(AuthError::invalid_grant("authorization code already used"));
            }
            if let Some(family_id) = &record.family_id {
                self.tokens.mark_family_revoked(family_id).await?;
                tracing::warn!(
                    client_id = %record.client_id,
                    family_id = %family_id,
                    "Authorization code replayed, issued tokens revoked"
                );
            }
            return Err(AuthError::invalid_grant("authorization code already used"));
        }
        if record.is_expired(OffsetDateTime::now_utc()) {
            return Err(AuthError::invalid_grant("authorization code expired"));
        }

        let client = self.clients.authenticate(credentials).await?;
        if record.client_id != client.client_id {
            return Err(AuthError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if record.redirect_uri != exchange.redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri mismatch"));
        }

        match (&record.code_challenge, &exchange.code_verifier) {
            (Some(challenge), Some(verifier)) => {
                challenge.verify(&PkceVerifier::new(verifier.as_str())?)?;
            }
            (Some(_), None) => {
                return Err(AuthError::invalid_grant("code_verifier is required"));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_grant(
                    "code_verifier sent for a code without a challenge",
                ));
            }
            (None, None) => {}
        }

        let family_id = Uuid::new_v4().to_string();
        let redeemed = record.redeemed(&family_id, OffsetDateTime::now_utc());
        if !storage::swap_json(self.store.as_ref(), &key, &current, &redeemed, None).await? {
            return Err(AuthError::invalid_grant("authorization code already used"));
        }

        let response = self
            .tokens
            .issue_in_family(&record.user_id, &record.client_id, &record.scope, &family_id)
            .await?;

        tracing::info!(
            client_id = %record.client_id,
            family_id = %family_id,
            "Exchanged authorization code"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::CodeExchanged)
                    .subject(&record.user_id)
                    .client(&record.client_id)
                    .meta("family_id", family_id.as_str()),
            )
            .await?;

        Ok(response)
    }
}
