//! Fixed-window admission control on the shared state store.
//!
//! Each `(subject, window)` pair has its own counter key, incremented with
//! the store's atomic increment-with-TTL, so concurrent workers never under-
//! or over-count. Denials are audited before the request is rejected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::audit::{AuditAction, AuditEventBuilder, AuditLog};
use crate::config::RateLimitingConfig;
use crate::storage::{StateStore, keys};
use crate::{AuthError, AuthResult};

/// Route classes with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Challenge,
    Verify,
    Authorize,
    Token,
    Register,
    Introspect,
    Revoke,
}

impl RouteClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Challenge => "challenge",
            Self::Verify => "verify",
            Self::Authorize => "authorize",
            Self::Token => "token",
            Self::Register => "register",
            Self::Introspect => "introspect",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// End of the current window.
    pub reset_at: OffsetDateTime,
}

impl RateLimitDecision {
    /// Time left until the window resets, relative to `now`.
    #[must_use]
    pub fn retry_after(&self, now: OffsetDateTime) -> Duration {
        let secs = (self.reset_at - now).whole_milliseconds().max(0);
        Duration::from_millis(u64::try_from(secs).unwrap_or(u64::MAX))
    }

    fn unlimited(now: OffsetDateTime) -> Self {
        Self {
            allowed: true,
            limit: u64::MAX,
            remaining: u64::MAX,
            reset_at: now,
        }
    }
}

/// Store-backed rate limiter.
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    audit: Arc<AuditLog>,
    config: RateLimitingConfig,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn StateStore>,
        audit: Arc<AuditLog>,
        config: RateLimitingConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Counts one request for `subject_key` against `limit` per `window`.
    pub async fn allow(
        &self,
        subject_key: &str,
        limit: u64,
        window: Duration,
    ) -> AuthResult<RateLimitDecision> {
        self.allow_at(subject_key, limit, window, OffsetDateTime::now_utc())
            .await
    }

    /// [`allow`](Self::allow) evaluated at an explicit instant.
    pub async fn allow_at(
        &self,
        subject_key: &str,
        limit: u64,
        window: Duration,
        now: OffsetDateTime,
    ) -> AuthResult<RateLimitDecision> {
        let window_ms = i128::try_from(window.as_millis()).unwrap_or(i128::MAX).max(1);
        let now_ms = now.unix_timestamp_nanos() / 1_000_000;
        let window_start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let reset_at_ns = (window_start_ms + window_ms) * 1_000_000;
        let reset_at = OffsetDateTime::from_unix_timestamp_nanos(reset_at_ns)
            .map_err(|e| AuthError::internal(format!("rate limit window out of range: {e}")))?;

        let key = keys::rate_limit(
            subject_key,
            i64::try_from(window_start_ms).unwrap_or(i64::MAX),
        );
        let counter = self
            .store
            .increment(&key, window.max(Duration::from_millis(1)))
            .await?;

        Ok(RateLimitDecision {
            allowed: counter.value <= limit,
            limit,
            remaining: limit.saturating_sub(counter.value),
            reset_at,
        })
    }

    /// Checks the configured budget for a route class.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RateLimited`] after auditing the denial.
    pub async fn check(&self, class: RouteClass, subject: &str) -> AuthResult<RateLimitDecision> {
        let now = OffsetDateTime::now_utc();
        if !self.config.enabled {
            return Ok(RateLimitDecision::unlimited(now));
        }

        let limit = self.config.limit_for(class);
        let subject_key = format!("{class}:{subject}");
        let decision = self
            .allow_at(&subject_key, limit, self.config.window, now)
            .await?;

        if decision.allowed {
            return Ok(decision);
        }

        tracing::warn!(
            route_class = %class,
            subject = %subject,
            limit = limit,
            "Rate limit exceeded"
        );
        self.audit
            .record(
                AuditEventBuilder::new(AuditAction::RateLimited)
                    .subject(subject)
                    .failure(format!("{class} budget of {limit} exhausted"))
                    .meta("route_class", class.as_str()),
            )
            .await?;

        Err(AuthError::RateLimited {
            retry_after: decision.retry_after(now),
            limit,
            reset_at: decision.reset_at.unix_timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::test_support::{FailingSink, RecordingSink};
    use crate::storage::MemoryStateStore;
    use time::macros::datetime;

    fn limiter(config: RateLimitingConfig) -> (RateLimiter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let audit = Arc::new(AuditLog::new(sink.clone(), false));
        (
            RateLimiter::new(Arc::new(MemoryStateStore::new()), audit, config),
            sink,
        )
    }

    #[tokio::test]
    async fn test_sixth_request_denied_then_allowed_after_rollover() {
        let (limiter, _) = limiter(RateLimitingConfig::default());
        let window = Duration::from_secs(60);
        let now = datetime!(2026-01-01 12:00:10 UTC);

        for expected_remaining in (0..5).rev() {
            let decision = limiter.allow_at("client-a", 5, window, now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.allow_at("client-a", 5, window, now).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, datetime!(2026-01-01 12:01:00 UTC));
        assert_eq!(denied.retry_after(now), Duration::from_secs(50));

        let next_window = now + window;
        let allowed = limiter
            .allow_at("client-a", 5, window, next_window)
            .await
            .unwrap();
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 4);
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let (limiter, _) = limiter(RateLimitingConfig::default());
        let window = Duration::from_secs(60);
        let now = OffsetDateTime::now_utc();

        assert!(limiter.allow_at("a", 1, window, now).await.unwrap().allowed);
        assert!(!limiter.allow_at("a", 1, window, now).await.unwrap().allowed);
        assert!(limiter.allow_at("b", 1, window, now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_check_audits_denial() {
        let config = RateLimitingConfig {
            token: 2,
            ..RateLimitingConfig::default()
        };
        let (limiter, sink) = limiter(config);

        limiter.check(RouteClass::Token, "app").await.unwrap();
        limiter.check(RouteClass::Token, "app").await.unwrap();
        let err = limiter.check(RouteClass::Token, "app").await.unwrap_err();

        match err {
            AuthError::RateLimited { limit, .. } => assert_eq!(limit, 2),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(sink.actions(), vec![AuditAction::RateLimited]);

        // Other classes keep their own budget.
        limiter.check(RouteClass::Authorize, "app").await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let config = RateLimitingConfig {
            enabled: false,
            token: 0,
            ..RateLimitingConfig::default()
        };
        let (limiter, sink) = limiter(config);

        for _ in 0..10 {
            assert!(limiter.check(RouteClass::Token, "app").await.unwrap().allowed);
        }
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_denial_with_failing_audit_fail_closed() {
        let audit = Arc::new(AuditLog::new(Arc::new(FailingSink), true));
        let config = RateLimitingConfig {
            token: 0,
            ..RateLimitingConfig::default()
        };
        let limiter = RateLimiter::new(Arc::new(MemoryStateStore::new()), audit, config);

        let err = limiter.check(RouteClass::Token, "app").await.unwrap_err();
        assert!(matches!(err, AuthError::Internal { .. }));
    }
}
