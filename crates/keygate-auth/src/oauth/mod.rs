//! OAuth 2.0 authorization server.
//!
//! This module provides the authorization code grant and the client
//! registry behind it:
//!
//! - [`authorize`] - Request/response types for the authorization endpoint
//! - [`service`] - Code issuance and exchange
//! - [`registry`] - Client registration and authentication
//! - [`pkce`] - PKCE challenge/verifier implementation
//!
//! # Example
//!
//! ```ignore
//! use keygate_auth::oauth::{CodeExchange, LoginProof, PkceChallenge, PkceVerifier};
//!
//! // Client generates PKCE verifier and challenge
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! // Server issues a code once the user's login challenge is verified
//! let response = service.authorize(&request, &LoginProof::verified(session_id)).await?;
//! let redirect_url = response.to_redirect_url()?;
//!
//! // Client redeems it
//! let tokens = service.exchange_code(&exchange, &credentials).await?;
//! ```

pub mod authorize;
pub mod client;
pub mod code;
pub mod pkce;
pub mod registry;
pub mod scope;
pub mod secret;
pub mod service;

// Authorization endpoint types
pub use authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizationResponse,
};

// Clients
pub use client::{Client, ClientCredentials, ClientMetadata, ClientType, RegisteredClient};
pub use registry::ClientRegistry;

// PKCE types
pub use pkce::{PkceChallenge, PkceError, PkceMethod, PkceVerifier};

pub use code::AuthorizationCode;
pub use scope::ScopeSet;

// Service types
pub use service::{
    AuthorizationConfig, AuthorizationService, CONCURRENT_EXCHANGE_GRACE, CodeExchange,
    LoginProof, SignedLogin,
};
