//! One-time login challenges (LNURL-auth style).
//!
//! A challenge moves through `Created -> Verified -> Consumed`. Every
//! transition is a compare-and-swap on the stored record, so each step
//! happens exactly once no matter how many workers race on it.
//!
//! Records outlive their logical expiry by [`EXPIRED_RETENTION`] so late
//! callers get [`AuthError::ChallengeExpired`] instead of a generic
//! not-found.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::identity::{IdentityResolver, User};
use crate::signature;
use crate::storage::{self, StateStore, keys};
use crate::{AuthError, AuthResult};

/// How long an expired challenge stays readable.
pub const EXPIRED_RETENTION: Duration = Duration::from_secs(60);

/// Stored lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    Created,
    Verified,
    Consumed,
}

/// Status as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Created,
    Verified,
    Consumed,
    Expired,
    NotFound,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Verified => "verified",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
            Self::NotFound => "not_found",
        }
    }
}

/// Persisted challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub session_id: String,
    /// 32 random bytes, hex.
    pub k1: String,
    pub state: ChallengeState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Normalized key bound on verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl ChallengeRecord {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// What the caller needs to present a challenge to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedChallenge {
    pub k1: String,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Issues, verifies and consumes login challenges.
pub struct ChallengeManager {
    store: Arc<dyn StateStore>,
    identity: Arc<IdentityResolver>,
    audit: Arc<AuditLog>,
    ttl: Duration,
}

impl ChallengeManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        identity: Arc<IdentityResolver>,
        audit: Arc<AuditLog>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            audit,
            ttl,
        }
    }

    /// Creates and persists a new challenge.
    pub async fn create_challenge(&self) -> AuthResult<IssuedChallenge> {
        let k1 = hex::encode(rand::thread_rng().r#gen::<[u8; 32]>());
        let session_id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let record = ChallengeRecord {
            session_id: session_id.clone(),
            k1: k1.clone(),
            state: ChallengeState::Created,
            created_at: now,
            expires_at: now + self.ttl,
            public_key: None,
        };

        let retention = Some(self.ttl + EXPIRED_RETENTION);
        if !storage::insert_json(
            self.store.as_ref(),
            &keys::challenge(&session_id),
            &record,
            retention,
        )
        .await?
        {
            return Err(AuthError::internal("challenge session id collision"));
        }
        self.store
            .put(&keys::challenge_k1(&k1), session_id.as_bytes(), retention)
            .await?;

        tracing::debug!(session_id = %session_id, "Challenge created");
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::ChallengeCreated)
                    .meta("session_id", session_id.as_str()),
            )
            .await?;

        Ok(IssuedChallenge {
            k1,
            session_id,
            expires_at: record.expires_at,
        })
    }

    /// Reports the current status of a challenge.
    pub async fn status(&self, session_id: &str) -> AuthResult<ChallengeStatus> {
        let Some(record) = self.load(session_id).await? else {
            return Ok(ChallengeStatus::NotFound);
        };
        let record = record.value;
        if record.is_expired(OffsetDateTime::now_utc()) {
            return Ok(ChallengeStatus::Expired);
        }

        Ok(match record.state {
            ChallengeState::Created => ChallengeStatus::Created,
            ChallengeState::Verified => ChallengeStatus::Verified,
            ChallengeState::Consumed => ChallengeStatus::Consumed,
        })
    }

    /// Verifies a wallet's signature over k1 and binds the identity.
    ///
    /// Expiry is checked before any signature work.
    pub async fn verify_challenge(
        &self,
        session_id: &str,
        k1: &str,
        public_key_hex: &str,
        signature_hex: &str,
    ) -> AuthResult<User> {
        let Some(current) = self.load(session_id).await? else {
            return Err(AuthError::invalid_request("unknown challenge"));
        };
        let record = &current.value;

        if record.is_expired(OffsetDateTime::now_utc()) {
            self.audit_failure(session_id, "challenge expired").await;
            return Err(AuthError::ChallengeExpired);
        }
        if record.state != ChallengeState::Created {
            return Err(AuthError::already_consumed("challenge already answered"));
        }
        if !record.k1.eq_ignore_ascii_case(k1.trim()) {
            self.audit_failure(session_id, "k1 mismatch").await;
            return Err(AuthError::invalid_request("k1 does not match challenge"));
        }

        let verification =
            signature::verify_challenge_hex(public_key_hex, &record.k1, signature_hex);
        let public_key = match verification {
            Ok((public_key, true)) => public_key,
            Ok((_, false)) => {
                self.audit_failure(session_id, "signature mismatch").await;
                return Err(AuthError::InvalidSignature);
            }
            Err(e) => {
                self.audit_failure(session_id, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let verified = ChallengeRecord {
            state: ChallengeState::Verified,
            public_key: Some(public_key.to_hex()),
            ..record.clone()
        };
        if !storage::swap_json(
            self.store.as_ref(),
            &keys::challenge(session_id),
            &current,
            &verified,
            None,
        )
        .await?
        {
            return Err(AuthError::already_consumed("challenge already answered"));
        }

        match self.finish_verification(session_id, &public_key).await {
            Ok(user) => Ok(user),
            Err(e) => {
                // An incomplete verification must never be consumable.
                self.burn(session_id, &verified).await;
                Err(e)
            }
        }
    }

    async fn finish_verification(
        &self,
        session_id: &str,
        public_key: &signature::PublicKey,
    ) -> AuthResult<User> {
        let user = self.identity.resolve_or_create(public_key).await?;
        tracing::info!(session_id = %session_id, user_id = %user.id, "Challenge verified");
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::ChallengeVerified)
                    .subject(&user.id)
                    .meta("session_id", session_id),
            )
            .await?;
        Ok(user)
    }

    /// Moves a verified challenge straight to `Consumed`.
    async fn burn(&self, session_id: &str, verified: &ChallengeRecord) {
        let Ok(Some(current)) = self.load(session_id).await else {
            return;
        };
        if current.value != *verified {
            return;
        }
        let consumed = ChallengeRecord {
            state: ChallengeState::Consumed,
            ..verified.clone()
        };
        if let Err(e) = storage::swap_json(
            self.store.as_ref(),
            &keys::challenge(session_id),
            &current,
            &consumed,
            None,
        )
        .await
        {
            tracing::error!(session_id = %session_id, error = %e, "Failed to retire challenge");
        }
    }

    /// LNURL-auth callback variant: the wallet only knows k1.
    pub async fn verify_by_k1(
        &self,
        k1: &str,
        public_key_hex: &str,
        signature_hex: &str,
    ) -> AuthResult<User> {
        let k1 = k1.trim().to_ascii_lowercase();
        let session_id = self
            .store
            .get(&keys::challenge_k1(&k1))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| AuthError::invalid_request("unknown challenge"))?;

        self.verify_challenge(&session_id, &k1, public_key_hex, signature_hex)
            .await
    }

    /// Consumes a verified challenge exactly once and returns its user.
    pub async fn consume_challenge(&self, session_id: &str) -> AuthResult<User> {
        let Some(current) = self.load(session_id).await? else {
            return Err(AuthError::invalid_request("unknown challenge"));
        };
        let record = &current.value;
        if record.is_expired(OffsetDateTime::now_utc()) {
            return Err(AuthError::ChallengeExpired);
        }

        match record.state {
            ChallengeState::Consumed => {
                return Err(AuthError::already_consumed("challenge already consumed"));
            }
            ChallengeState::Created => {
                return Err(AuthError::invalid_request("challenge not verified"));
            }
            ChallengeState::Verified => {}
        }

        let user_id = record
            .public_key
            .clone()
            .ok_or_else(|| AuthError::internal("verified challenge has no bound key"))?;

        let consumed = ChallengeRecord {
            state: ChallengeState::Consumed,
            ..record.clone()
        };
        if !storage::swap_json(
            self.store.as_ref(),
            &keys::challenge(session_id),
            &current,
            &consumed,
            None,
        )
        .await?
        {
            return Err(AuthError::already_consumed("challenge already consumed"));
        }

        let user = self
            .identity
            .find(&user_id)
            .await?
            .ok_or_else(|| AuthError::internal(format!("user {user_id} missing")))?;

        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::ChallengeConsumed)
                    .subject(&user.id)
                    .meta("session_id", session_id),
            )
            .await?;

        Ok(user)
    }

    async fn load(
        &self,
        session_id: &str,
    ) -> AuthResult<Option<storage::Versioned<ChallengeRecord>>> {
        storage::load_json(self.store.as_ref(), &keys::challenge(session_id)).await
    }

    async fn audit_failure(&self, session_id: &str, reason: &str) {
        // The rejection is returned regardless; the log records sink failures itself.
        let _ = self
            .audit
            .record(
                AuditEventBuilder::new(AuditAction::ChallengeFailed)
                    .failure(reason)
                    .meta("session_id", session_id),
            )
            .await;
    }
}
