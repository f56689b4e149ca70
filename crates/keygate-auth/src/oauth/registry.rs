//! Client registration and authentication.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use super::client::{Client, ClientCredentials, ClientMetadata, ClientType, RegisteredClient};
use super::scope::ScopeSet;
use super::secret::{generate_client_secret, hash_client_secret, verify_client_secret};
use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::storage::{self, StateStore, keys};
use crate::{AuthError, AuthResult};

/// Stores clients and checks their credentials.
pub struct ClientRegistry {
    store: Arc<dyn StateStore>,
    audit: Arc<AuditLog>,
    supported_scopes: ScopeSet,
}

impl ClientRegistry {
    pub fn new(
        store: Arc<dyn StateStore>,
        audit: Arc<AuditLog>,
        supported_scopes: ScopeSet,
    ) -> Self {
        Self {
            store,
            audit,
            supported_scopes,
        }
    }

    /// Registers a client.
    ///
    /// Confidential clients get a secret, returned once; public clients get none.
    pub async fn register(&self, metadata: ClientMetadata) -> AuthResult<RegisteredClient> {
        let name = metadata.name.trim();
        if name.is_empty() {
            return Err(AuthError::invalid_request("client name is required"));
        }
        if metadata.redirect_uris.is_empty() {
            return Err(AuthError::invalid_request(
                "at least one redirect_uri is required",
            ));
        }
        for uri in &metadata.redirect_uris {
            validate_redirect_uri(uri)?;
        }

        let scopes = match metadata.scope.as_deref() {
            Some(raw) => ScopeSet::parse(raw)?,
            None => self.supported_scopes.clone(),
        };
        if !scopes.is_subset(&self.supported_scopes) {
            return Err(AuthError::invalid_scope(format!(
                "unsupported scopes: {}",
                scopes.excess_over(&self.supported_scopes).join(" ")
            )));
        }

        let (client_secret, client_secret_hash) = match metadata.client_type {
            ClientType::Public => (None, None),
            ClientType::Confidential => {
                let secret = generate_client_secret();
                let hash = hash_client_secret(&secret)?;
                (Some(secret), Some(hash))
            }
        };

        let now = OffsetDateTime::now_utc();
        let client = Client {
            client_id: format!("kgc_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            client_type: metadata.client_type,
            client_secret_hash,
            redirect_uris: metadata.redirect_uris,
            scopes,
            created_at: now,
            secret_rotated_at: None,
        };

        if !storage::insert_json(
            self.store.as_ref(),
            &keys::client(&client.client_id),
            &client,
            None,
        )
        .await?
        {
            return Err(AuthError::internal("client id collision"));
        }

        tracing::info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            "Registered client"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::ClientRegistered)
                    .client(&client.client_id)
                    .meta("client_type", client.client_type.as_str()),
            )
            .await?;

        Ok(RegisteredClient {
            client_id: client.client_id,
            client_secret,
            client_name: client.name,
            client_type: client.client_type,
            redirect_uris: client.redirect_uris,
            scope: client.scopes,
            client_id_issued_at: now.unix_timestamp(),
        })
    }

    pub async fn find(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(
            storage::load_json::<Client>(self.store.as_ref(), &keys::client(client_id))
                .await?
                .map(|v| v.value),
        )
    }

    /// Authenticates a client.
    ///
    /// Confidential clients must present their secret. Public clients must
    /// not present one.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> AuthResult<Client> {
        let Some(client) = self.find(&credentials.client_id).await? else {
            self.audit_auth_failure(&credentials.client_id, "unknown client")
                .await;
            return Err(AuthError::invalid_client("unknown client"));
        };

        match (&client.client_secret_hash, &credentials.client_secret) {
            (None, None) => Ok(client),
            (None, Some(_)) => {
                self.audit_auth_failure(&client.client_id, "public client sent a secret")
                    .await;
                Err(AuthError::invalid_client(
                    "public clients must not use client secrets",
                ))
            }
            (Some(_), None) => {
                self.audit_auth_failure(&client.client_id, "missing secret")
                    .await;
                Err(AuthError::invalid_client(
                    "client authentication required",
                ))
            }
            (Some(hash), Some(secret)) => {
                if verify_client_secret(secret, hash)? {
                    Ok(client)
                } else {
                    self.audit_auth_failure(&client.client_id, "wrong secret")
                        .await;
                    Err(AuthError::invalid_client("client authentication failed"))
                }
            }
        }
    }

    /// Replaces a confidential client's secret. Returns the new plaintext secret.
    pub async fn rotate_secret(&self, credentials: &ClientCredentials) -> AuthResult<String> {
        let client = self.authenticate(credentials).await?;
        if !client.is_confidential() {
            return Err(AuthError::invalid_client(
                "public clients have no secret to rotate",
            ));
        }

        let key = keys::client(&client.client_id);
        let current = storage::load_json::<Client>(self.store.as_ref(), &key)
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;

        let secret = generate_client_secret();
        let updated = Client {
            client_secret_hash: Some(hash_client_secret(&secret)?),
            secret_rotated_at: Some(OffsetDateTime::now_utc()),
            ..current.value.clone()
        };
        if !storage::swap_json(self.store.as_ref(), &key, &current, &updated, None).await? {
            return Err(AuthError::already_consumed(
                "client was modified concurrently",
            ));
        }

        tracing::info!(client_id = %client.client_id, "Rotated client secret");
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::ClientSecretRotated).client(&client.client_id),
            )
            .await?;

        Ok(secret)
    }

    async fn audit_auth_failure(&self, client_id: &str, reason: &str) {
        let _ = self
            .audit
            .record(
                AuditEventBuilder::new(AuditAction::ClientAuthFailed)
                    .client(client_id)
                    .failure(reason),
            )
            .await;
    }
}

fn validate_redirect_uri(uri: &str) -> AuthResult<()> {
    let parsed = url::Url::parse(uri)
        .map_err(|_| AuthError::invalid_request(format!("redirect_uri '{uri}' is not absolute")))?;
    if parsed.fragment().is_some() {
        return Err(AuthError::invalid_request(format!(
            "redirect_uri '{uri}' must not contain a fragment"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::test_support::RecordingSink;
    use crate::storage::MemoryStateStore;

    fn registry() -> (ClientRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let audit = Arc::new(AuditLog::new(sink.clone(), false));
        (
            ClientRegistry::new(
                Arc::new(MemoryStateStore::new()),
                audit,
                ScopeSet::parse("openid profile offline_access").unwrap(),
            ),
            sink,
        )
    }

    fn metadata(client_type: ClientType) -> ClientMetadata {
        ClientMetadata {
            name: "Example".to_string(),
            client_type,
            redirect_uris: vec!["https://app.example/cb".to_string()],
            scope: Some("openid profile".to_string()),
        }
    }

    #[tokio::test]
    async fn test_public_client_gets_no_secret() {
        let (registry, _) = registry();
        let registered = registry.register(metadata(ClientType::Public)).await.unwrap();

        assert!(registered.client_secret.is_none());
        let stored = registry.find(&registered.client_id).await.unwrap().unwrap();
        assert!(stored.client_secret_hash.is_none());

        let client = registry
            .authenticate(&ClientCredentials::public(&registered.client_id))
            .await
            .unwrap();
        assert_eq!(client.client_id, registered.client_id);
    }

    #[tokio::test]
    async fn test_confidential_client_secret_is_hashed() {
        let (registry, _) = registry();
        let registered = registry
            .register(metadata(ClientType::Confidential))
            .await
            .unwrap();
        let secret = registered.client_secret.clone().unwrap();

        let stored = registry.find(&registered.client_id).await.unwrap().unwrap();
        let hash = stored.client_secret_hash.unwrap();
        assert_ne!(hash, secret);
        assert!(hash.starts_with("$argon2id$"));

        registry
            .authenticate(&ClientCredentials::with_secret(&registered.client_id, &secret))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_authentication_failures() {
        let (registry, sink) = registry();
        let confidential = registry
            .register(metadata(ClientType::Confidential))
            .await
            .unwrap();
        let public = registry.register(metadata(ClientType::Public)).await.unwrap();

        let cases = [
            ClientCredentials::public("kgc_unknown"),
            ClientCredentials::public(&confidential.client_id),
            ClientCredentials::with_secret(&confidential.client_id, "kgs_wrong"),
            ClientCredentials::with_secret(&public.client_id, "anything"),
        ];
        for credentials in cases {
            let err = registry.authenticate(&credentials).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidClient { .. }), "{credentials:?}");
        }

        let failures = sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::ClientAuthFailed)
            .count();
        assert_eq!(failures, 4);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (registry, _) = registry();

        let mut bad = metadata(ClientType::Public);
        bad.redirect_uris = vec!["/relative".to_string()];
        assert!(matches!(
            registry.register(bad).await,
            Err(AuthError::InvalidRequest { .. })
        ));

        let mut bad = metadata(ClientType::Public);
        bad.redirect_uris = vec!["https://app.example/cb#frag".to_string()];
        assert!(registry.register(bad).await.is_err());

        let mut bad = metadata(ClientType::Public);
        bad.scope = Some("openid admin".to_string());
        assert!(matches!(
            registry.register(bad).await,
            Err(AuthError::InvalidScope { .. })
        ));

        let mut defaulted = metadata(ClientType::Public);
        defaulted.scope = None;
        let registered = registry.register(defaulted).await.unwrap();
        assert!(registered.scope.contains("offline_access"));
    }

    #[tokio::test]
    async fn test_rotate_secret() {
        let (registry, sink) = registry();
        let registered = registry
            .register(metadata(ClientType::Confidential))
            .await
            .unwrap();
        let old = registered.client_secret.unwrap();

        let new = registry
            .rotate_secret(&ClientCredentials::with_secret(&registered.client_id, &old))
            .await
            .unwrap();
        assert_ne!(old, new);

        assert!(
            registry
                .authenticate(&ClientCredentials::with_secret(&registered.client_id, &old))
                .await
                .is_err()
        );
        registry
            .authenticate(&ClientCredentials::with_secret(&registered.client_id, &new))
            .await
            .unwrap();
        assert!(sink.actions().contains(&AuditAction::ClientSecretRotated));
    }
}
