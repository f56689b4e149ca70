//! # keygate-auth
//!
//! Keypair-based identity and OAuth 2.0 authorization server engine.
//!
//! Users prove control of a secp256k1 key by signing a one-time challenge
//! (LNURL-auth style). The engine turns that proof into a stable identity
//! and issues OAuth 2.0 authorization codes, signed JWT access tokens and
//! rotating refresh tokens to registered clients.
//!
//! ## Modules
//!
//! - [`storage`] - Shared state store abstraction (TTL, CAS, atomic counters)
//! - [`signature`] - secp256k1 ECDSA verification
//! - [`challenge`] - Login challenge lifecycle
//! - [`identity`] - Public key to user resolution
//! - [`ratelimit`] - Fixed-window rate limiting over the shared store
//! - [`audit`] - Security event audit logging
//! - [`oauth`] - Clients, authorization requests and code exchange
//! - [`token`] - Token issuance, rotation, revocation and introspection
//! - [`engine`] - Wiring of all services over one store
//! - [`http`] - Axum handlers for the public endpoints
//! - [`config`] - Configuration types

pub mod audit;
pub mod challenge;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod identity;
pub mod oauth;
pub mod ratelimit;
pub mod signature;
pub mod storage;
pub mod token;

pub use audit::{AuditAction, AuditEvent, AuditLog, AuditOutcome, AuditSeverity, AuditSink};
pub use challenge::{ChallengeManager, ChallengeState, ChallengeStatus, IssuedChallenge};
pub use config::{AuthConfig, ConfigError};
pub use engine::AuthEngine;
pub use error::{AuthError, ErrorCategory};
pub use http::{AuthState, router};
pub use identity::{IdentityResolver, User};
pub use oauth::{AuthorizationService, ClientRegistry, ScopeSet};
pub use ratelimit::{RateLimitDecision, RateLimiter, RouteClass};
pub use signature::{PublicKey, SignatureError};
pub use storage::{MemoryStateStore, StateStore};
pub use token::{JwtService, TokenResponse, TokenService};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;
