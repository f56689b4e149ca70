//! Security audit trail.
//!
//! Every security-relevant step (logins, code exchanges, refresh reuse,
//! revocations, rate-limit denials) is written through [`AuditLog`]. The log
//! is append-only: sinks never update or delete entries.
//!
//! A failing sink does not silently vanish. With the default fail-open
//! policy the failure is logged, counted, and returned to the caller as
//! [`AuditOutcome::Degraded`] so the primary operation can complete. With
//! fail-closed enabled the failure becomes [`AuthError::Internal`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::storage::{StateStore, keys};
use crate::{AuthError, AuthResult};

/// Tracing target used by [`TracingAuditSink`].
pub const AUDIT_TARGET: &str = "keygate::audit";

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Keypair login
    ChallengeCreated,
    ChallengeVerified,
    ChallengeFailed,
    ChallengeConsumed,
    UserCreated,

    // Client management
    ClientRegistered,
    ClientSecretRotated,
    ClientAuthFailed,

    // Authorization code flow
    AuthorizationGranted,
    AuthorizationDenied,
    CodeExchanged,
    CodeExchangeFailed,

    // Token lifecycle
    TokenRefreshed,
    RefreshFailed,
    RefreshReuseDetected,
    TokenRevoked,
    IntrospectionDenied,

    // Admission control
    RateLimited,
}

impl AuditAction {
    /// Dotted event type code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChallengeCreated => "challenge.created",
            Self::ChallengeVerified => "challenge.verified",
            Self::ChallengeFailed => "challenge.failed",
            Self::ChallengeConsumed => "challenge.consumed",
            Self::UserCreated => "user.created",
            Self::ClientRegistered => "client.registered",
            Self::ClientSecretRotated => "client.secret_rotated",
            Self::ClientAuthFailed => "client.auth_failed",
            Self::AuthorizationGranted => "authorize.granted",
            Self::AuthorizationDenied => "authorize.denied",
            Self::CodeExchanged => "token.code_exchanged",
            Self::CodeExchangeFailed => "token.code_exchange_failed",
            Self::TokenRefreshed => "token.refreshed",
            Self::RefreshFailed => "token.refresh_failed",
            Self::RefreshReuseDetected => "token.refresh_reuse_detected",
            Self::TokenRevoked => "token.revoked",
            Self::IntrospectionDenied => "token.introspection_denied",
            Self::RateLimited => "ratelimit.denied",
        }
    }

    fn default_severity(&self) -> AuditSeverity {
        match self {
            Self::RefreshReuseDetected => AuditSeverity::Critical,
            Self::ChallengeFailed
            | Self::ClientAuthFailed
            | Self::AuthorizationDenied
            | Self::CodeExchangeFailed
            | Self::RefreshFailed
            | Self::IntrospectionDenied
            | Self::RateLimited => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        }
    }
}

/// Event severity. `Critical` marks security incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Fluent builder for [`AuditEvent`].
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    action: AuditAction,
    severity: AuditSeverity,
    success: bool,
    subject: Option<String>,
    client_id: Option<String>,
    reason: Option<String>,
    metadata: Map<String, Value>,
}

impl AuditEventBuilder {
    /// Starts a successful event for `action`.
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            severity: action.default_severity(),
            success: true,
            subject: None,
            client_id: None,
            reason: None,
            metadata: Map::new(),
        }
    }

    /// Marks the event as a failure with a reason.
    #[must_use]
    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.reason = Some(reason.into());
        self
    }

    /// Overrides the default severity.
    #[must_use]
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the subject (user id, address or other rate-limit subject).
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the client the event concerns.
    #[must_use]
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Finalizes the event with a fresh id and timestamp.
    #[must_use]
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            action: self.action,
            event_type: self.action.code().to_string(),
            severity: self.severity,
            success: self.success,
            subject: self.subject,
            client_id: self.client_id,
            reason: self.reason,
            metadata: self.metadata,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Audit sink errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit sink error: {0}")]
    Sink(String),
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one event.
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Writes events as structured log lines on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let metadata = Value::Object(event.metadata.clone());
        match event.severity {
            AuditSeverity::Critical => tracing::error!(
                target: AUDIT_TARGET,
                audit_id = %event.id,
                event_type = %event.event_type,
                success = event.success,
                subject = event.subject.as_deref().unwrap_or("-"),
                client_id = event.client_id.as_deref().unwrap_or("-"),
                reason = event.reason.as_deref().unwrap_or("-"),
                metadata = %metadata,
                "Security incident"
            ),
            AuditSeverity::Warning => tracing::warn!(
                target: AUDIT_TARGET,
                audit_id = %event.id,
                event_type = %event.event_type,
                success = event.success,
                subject = event.subject.as_deref().unwrap_or("-"),
                client_id = event.client_id.as_deref().unwrap_or("-"),
                reason = event.reason.as_deref().unwrap_or("-"),
                metadata = %metadata,
                "Audit event"
            ),
            AuditSeverity::Info => tracing::info!(
                target: AUDIT_TARGET,
                audit_id = %event.id,
                event_type = %event.event_type,
                success = event.success,
                subject = event.subject.as_deref().unwrap_or("-"),
                client_id = event.client_id.as_deref().unwrap_or("-"),
                metadata = %metadata,
                "Audit event"
            ),
        }
        Ok(())
    }
}

/// Appends events to the shared state store under time-ordered keys.
#[derive(Clone)]
pub struct StoreAuditSink {
    store: Arc<dyn StateStore>,
}

impl StoreAuditSink {
    /// Creates a sink writing to `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let key = keys::audit(event.timestamp.unix_timestamp_nanos(), &event.id.to_string());
        let bytes = serde_json::to_vec(event).map_err(|e| AuditError::Sink(e.to_string()))?;

        let created = self
            .store
            .put_if_absent(&key, &bytes, None)
            .await
            .map_err(|e| AuditError::Sink(e.to_string()))?;
        if !created {
            return Err(AuditError::Sink(format!("audit entry {key} already exists")));
        }
        Ok(())
    }
}

/// Result of a successful [`AuditLog::record`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// The sink accepted the event.
    Recorded,
    /// The sink failed and the log is running fail-open.
    Degraded,
}

/// Audit log with a configurable failure policy.
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    fail_closed: bool,
    degraded_writes: AtomicU64,
}

impl AuditLog {
    /// Creates an audit log over `sink`.
    pub fn new(sink: Arc<dyn AuditSink>, fail_closed: bool) -> Self {
        Self {
            sink,
            fail_closed,
            degraded_writes: AtomicU64::new(0),
        }
    }

    /// Whether sink failures fail the primary operation.
    #[must_use]
    pub fn is_fail_closed(&self) -> bool {
        self.fail_closed
    }

    /// Number of events lost to sink failures since startup.
    #[must_use]
    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.load(Ordering::Relaxed)
    }

    /// Records an event.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] when the sink fails and the log is
    /// fail-closed.
    pub async fn record(&self, builder: AuditEventBuilder) -> AuthResult<AuditOutcome> {
        let event = builder.build();

        match self.sink.append(&event).await {
            Ok(()) => {
                tracing::debug!(
                    audit_id = %event.id,
                    event_type = %event.event_type,
                    "Audit event recorded"
                );
                Ok(AuditOutcome::Recorded)
            }
            Err(e) if self.fail_closed => {
                tracing::error!(
                    error = %e,
                    audit_id = %event.id,
                    event_type = %event.event_type,
                    "Failed to record audit event, rejecting operation"
                );
                Err(AuthError::internal(format!("audit log unavailable: {e}")))
            }
            Err(e) => {
                self.degraded_writes.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    audit_id = %event.id,
                    event_type = %event.event_type,
                    "Failed to record audit event, continuing degraded"
                );
                Ok(AuditOutcome::Degraded)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FailingSink, RecordingSink};
    use super::*;
    use crate::storage::MemoryStateStore;

    #[test]
    fn test_builder_defaults() {
        let event = AuditEventBuilder::new(AuditAction::RefreshReuseDetected)
            .subject("02abc")
            .client("app")
            .failure("rotated token replayed")
            .meta("family_id", "f-1")
            .build();

        assert_eq!(event.event_type, "token.refresh_reuse_detected");
        assert_eq!(event.severity, AuditSeverity::Critical);
        assert!(!event.success);
        assert_eq!(event.metadata["family_id"], "f-1");
    }

    #[tokio::test]
    async fn test_record_success() {
        let sink = Arc::new(RecordingSink::default());
        let log = AuditLog::new(sink.clone(), false);

        let outcome = log
            .record(AuditEventBuilder::new(AuditAction::ChallengeCreated))
            .await
            .unwrap();

        assert_eq!(outcome, AuditOutcome::Recorded);
        assert_eq!(sink.actions(), vec![AuditAction::ChallengeCreated]);
    }

    #[tokio::test]
    async fn test_fail_open_reports_degraded() {
        let log = AuditLog::new(Arc::new(FailingSink), false);

        let outcome = log
            .record(AuditEventBuilder::new(AuditAction::CodeExchanged))
            .await
            .unwrap();

        assert_eq!(outcome, AuditOutcome::Degraded);
        assert_eq!(log.degraded_writes(), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_internal() {
        let log = AuditLog::new(Arc::new(FailingSink), true);

        let err = log
            .record(AuditEventBuilder::new(AuditAction::CodeExchanged))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Internal { .. }));
        assert_eq!(log.degraded_writes(), 0);
    }

    #[tokio::test]
    async fn test_store_sink_appends() {
        let store = Arc::new(MemoryStateStore::new());
        let log = AuditLog::new(Arc::new(StoreAuditSink::new(store.clone())), false);

        for _ in 0..3 {
            log.record(AuditEventBuilder::new(AuditAction::TokenRevoked))
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_all_severities() {
        let sink = TracingAuditSink;
        for action in [
            AuditAction::ChallengeCreated,
            AuditAction::RateLimited,
            AuditAction::RefreshReuseDetected,
        ] {
            sink.append(&AuditEventBuilder::new(action).build())
                .await
                .unwrap();
        }
    }
}
