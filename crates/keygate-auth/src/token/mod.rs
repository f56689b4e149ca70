//! Access and refresh tokens.

pub mod introspection;
pub mod jwt;
pub mod refresh;
pub mod service;

pub use introspection::{IntrospectionResponse, Requester, TokenTypeHint};
pub use jwt::{AccessTokenClaims, Jwk, Jwks, JwtError, JwtService, SigningAlgorithm, SigningKey};
pub use refresh::RefreshTokenRecord;
pub use service::{TokenConfig, TokenResponse, TokenService};
