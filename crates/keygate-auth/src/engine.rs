//! Wires every service onto one state store.

use std::sync::Arc;

use crate::audit::{AuditLog, AuditSink, StoreAuditSink, TracingAuditSink};
use crate::challenge::ChallengeManager;
use crate::config::{AuditSinkKind, AuthConfig};
use crate::identity::IdentityResolver;
use crate::oauth::{AuthorizationConfig, AuthorizationService, ClientRegistry, ScopeSet};
use crate::ratelimit::RateLimiter;
use crate::storage::StateStore;
use crate::token::{JwtService, SigningAlgorithm, SigningKey, TokenConfig, TokenService};
use crate::{AuthError, AuthResult};

/// The assembled identity server.
///
/// All services share the same store, so several engines in several
/// processes stay consistent as long as they point at the same backend.
pub struct AuthEngine {
    pub config: Arc<AuthConfig>,
    pub store: Arc<dyn StateStore>,
    pub audit: Arc<AuditLog>,
    pub identity: Arc<IdentityResolver>,
    pub challenges: Arc<ChallengeManager>,
    pub clients: Arc<ClientRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub jwt: Arc<JwtService>,
    pub tokens: Arc<TokenService>,
    pub authorization: Arc<AuthorizationService>,
}

impl AuthEngine {
    /// Validates the configuration and builds the services.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for invalid settings or an
    /// unreadable signing key.
    pub fn build(config: AuthConfig, store: Arc<dyn StateStore>) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let signing_key = load_signing_key(&config)?;
        tracing::info!(
            algorithm = %signing_key.algorithm,
            kid = %signing_key.kid,
            "Loaded token signing key"
        );
        let jwt = Arc::new(JwtService::new(
            signing_key,
            config.issuer.clone(),
            config.signing.clock_skew,
        ));

        let sink: Arc<dyn AuditSink> = match config.audit.sink {
            AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
            AuditSinkKind::Store => Arc::new(StoreAuditSink::new(store.clone())),
        };
        let audit = Arc::new(AuditLog::new(sink, config.audit.fail_closed));

        let supported_scopes = ScopeSet::parse(&config.oauth.supported_scopes.join(" "))
            .map_err(|e| AuthError::configuration(format!("oauth.supported_scopes: {e}")))?;

        let identity = Arc::new(IdentityResolver::new(store.clone(), audit.clone()));
        let challenges = Arc::new(ChallengeManager::new(
            store.clone(),
            identity.clone(),
            audit.clone(),
            config.challenge.ttl,
        ));
        let clients = Arc::new(ClientRegistry::new(
            store.clone(),
            audit.clone(),
            supported_scopes,
        ));
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            audit.clone(),
            config.rate_limiting.clone(),
        ));
        let tokens = Arc::new(TokenService::new(
            jwt.clone(),
            store.clone(),
            clients.clone(),
            limiter.clone(),
            audit.clone(),
            TokenConfig::from_oauth(&config.oauth),
        ));
        let authorization = Arc::new(AuthorizationService::new(
            store.clone(),
            clients.clone(),
            challenges.clone(),
            tokens.clone(),
            limiter.clone(),
            audit.clone(),
            AuthorizationConfig::from_oauth(&config.oauth),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            audit,
            identity,
            challenges,
            clients,
            limiter,
            jwt,
            tokens,
            authorization,
        })
    }

    /// Whether the token endpoint accepts `grant_type`.
    #[must_use]
    pub fn grant_type_enabled(&self, grant_type: &str) -> bool {
        self.config.oauth.grant_types.iter().any(|g| g == grant_type)
    }
}

fn load_signing_key(config: &AuthConfig) -> AuthResult<SigningKey> {
    let signing = &config.signing;
    let algorithm = SigningAlgorithm::parse(&signing.algorithm)
        .map_err(|e| AuthError::configuration(e.to_string()))?;
    let key_id = signing.key_id.clone();

    let key = match (algorithm, &signing.private_key_path) {
        (SigningAlgorithm::HS256, _) => {
            let secret = signing
                .secret
                .as_deref()
                .ok_or_else(|| AuthError::configuration("signing.secret is required for HS256"))?;
            SigningKey::hmac(secret.as_bytes(), key_id)
        }
        (_, Some(path)) => {
            let pem = std::fs::read_to_string(path).map_err(|e| {
                AuthError::configuration(format!(
                    "cannot read signing key {}: {e}",
                    path.display()
                ))
            })?;
            SigningKey::from_private_pem(algorithm, &pem, key_id)
        }
        (SigningAlgorithm::RS256, None) => {
            tracing::warn!("No signing key configured, generated an ephemeral RS256 key");
            SigningKey::generate_rsa()
        }
        (SigningAlgorithm::ES384, None) => {
            tracing::warn!("No signing key configured, generated an ephemeral ES384 key");
            SigningKey::generate_ec()
        }
    };

    key.map_err(|e| AuthError::configuration(e.to_string()))
}
