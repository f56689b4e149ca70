//! Maps verified public keys to user records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::signature::PublicKey;
use crate::storage::{self, StateStore, keys};
use crate::{AuthError, AuthResult};

/// Attempts at refreshing `last_login_at` before giving up on a hot record.
const LAST_LOGIN_ATTEMPTS: usize = 3;

/// A user, identified by the compressed hex of their public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Compressed SEC1 public key, hex. Immutable.
    pub id: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub last_login_at: OffsetDateTime,
}

/// Lazily creates users on first successful authentication.
pub struct IdentityResolver {
    store: Arc<dyn StateStore>,
    audit: Arc<AuditLog>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn StateStore>, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }

    /// Returns the user for `public_key`, creating it if this is the first login.
    ///
    /// `last_login_at` is refreshed for existing users. Losing the refresh
    /// race to a concurrent login is harmless and not retried indefinitely.
    pub async fn resolve_or_create(&self, public_key: &PublicKey) -> AuthResult<User> {
        let user_id = public_key.to_hex();
        let key = keys::user(&user_id);
        let now = OffsetDateTime::now_utc();

        let fresh = User {
            id: user_id.clone(),
            created_at: now,
            last_login_at: now,
        };
        if storage::insert_json(self.store.as_ref(), &key, &fresh, None).await? {
            tracing::info!(user_id = %user_id, "Created user on first login");
            self.audit
                .record(AuditEventBuilder::new(AuditAction::UserCreated).subject(&user_id))
                .await?;
            return Ok(fresh);
        }

        for _ in 0..LAST_LOGIN_ATTEMPTS {
            let Some(current) = storage::load_json::<User>(self.store.as_ref(), &key).await? else {
                return Err(AuthError::internal(format!(
                    "user {user_id} disappeared during login"
                )));
            };

            let mut updated = current.value.clone();
            updated.last_login_at = now;
            if storage::swap_json(self.store.as_ref(), &key, &current, &updated, None).await? {
                return Ok(updated);
            }
        }

        tracing::debug!(user_id = %user_id, "last_login_at contended, returning stored user");
        storage::load_json::<User>(self.store.as_ref(), &key)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| AuthError::internal(format!("user {user_id} disappeared during login")))
    }

    /// Looks up a user without side effects.
    pub async fn find(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(storage::load_json::<User>(self.store.as_ref(), &keys::user(user_id))
            .await?
            .map(|v| v.value))
    }
}
