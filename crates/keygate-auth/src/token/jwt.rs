//! JWT access token signing and validation.
//!
//! ## Supported Algorithms
//!
//! - **HS256**: HMAC with SHA-256. Single-deployment setups with a shared secret;
//!   nothing is published in the JWKS.
//! - **RS256**: RSA with SHA-256 (widely compatible).
//! - **ES384**: ECDSA with P-384 (smaller keys, the default).
//!
//! ## Example
//!
//! ```ignore
//! use keygate_auth::token::jwt::{JwtService, SigningKey};
//!
//! let key = SigningKey::generate_ec()?;
//! let jwt = JwtService::new(key, "https://id.example.com", Duration::from_secs(5));
//! let token = jwt.encode(&claims)?;
//! let data = jwt.decode::<AccessTokenClaims>(&token)?;
//! ```

use std::fmt;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::AuthError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    /// The token's `exp` has passed. Only reported for correctly signed tokens.
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl JwtError {
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims {
                message: err.to_string(),
            },
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::DecodingError {
                message: err.to_string(),
            },
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::EncodingError { message } | JwtError::InvalidKey { message } => {
                AuthError::internal(message)
            }
            other => AuthError::invalid_token(other.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    HS256,
    RS256,
    ES384,
}

impl SigningAlgorithm {
    pub fn parse(name: &str) -> Result<Self, JwtError> {
        match name {
            "HS256" => Ok(Self::HS256),
            "RS256" => Ok(Self::RS256),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }

    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::ES384 => "ES384",
        }
    }

    /// Asymmetric algorithms publish their public key in the JWKS.
    #[must_use]
    pub fn is_asymmetric(&self) -> bool {
        !matches!(self, Self::HS256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// User id (compressed public key hex).
    pub sub: String,
    /// The client the token was issued to.
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub scope: String,
    pub client_id: String,
    /// Refresh token family the token belongs to.
    pub fid: String,
}

// ============================================================================
// JWKS
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Public JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key
// ============================================================================

enum PublicKeyData {
    Symmetric,
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// Key material for one signing algorithm.
pub struct SigningKey {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl SigningKey {
    /// HS256 key from a shared secret.
    pub fn hmac(secret: &[u8], kid: Option<String>) -> Result<Self, JwtError> {
        if secret.len() < 32 {
            return Err(JwtError::invalid_key("HS256 secret must be at least 32 bytes"));
        }
        Ok(Self {
            kid: kid.unwrap_or_else(|| derive_kid(&[b"hs256".as_slice()])),
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
        })
    }

    /// Fresh RS256 keypair (2048 bit).
    pub fn generate_rsa() -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        Self::from_rsa(private_key, None)
    }

    /// Fresh ES384 keypair.
    pub fn generate_ec() -> Result<Self, JwtError> {
        Self::from_ec(EcSecretKey::random(&mut OsRng), None)
    }

    /// Loads a PKCS#8 PEM private key (SEC1 is also accepted for ES384).
    pub fn from_private_pem(
        algorithm: SigningAlgorithm,
        pem: &str,
        kid: Option<String>,
    ) -> Result<Self, JwtError> {
        match algorithm {
            SigningAlgorithm::RS256 => {
                let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                Self::from_rsa(private_key, kid)
            }
            SigningAlgorithm::ES384 => {
                let secret_key = EcSecretKey::from_pkcs8_pem(pem)
                    .or_else(|_| EcSecretKey::from_sec1_pem(pem))
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                Self::from_ec(secret_key, kid)
            }
            SigningAlgorithm::HS256 => Err(JwtError::invalid_key(
                "HS256 uses a shared secret, not a PEM key",
            )),
        }
    }

    fn from_rsa(private_key: RsaPrivateKey, kid: Option<String>) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_components(
            &URL_SAFE_NO_PAD.encode(&n),
            &URL_SAFE_NO_PAD.encode(&e),
        )
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: kid.unwrap_or_else(|| derive_kid(&[n.as_slice(), e.as_slice()])),
            algorithm: SigningAlgorithm::RS256,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa { n, e },
        })
    }

    fn from_ec(secret_key: EcSecretKey, kid: Option<String>) -> Result<Self, JwtError> {
        let point = EcSigningKey::from(&secret_key)
            .verifying_key()
            .to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?
            .to_vec();
        let y = point
            .y()
            .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?
            .to_vec();

        // jsonwebtoken only reads PKCS#8 EC keys.
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(&x),
            &URL_SAFE_NO_PAD.encode(&y),
        )
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: kid.unwrap_or_else(|| derive_kid(&[x.as_slice(), y.as_slice()])),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec { x, y },
        })
    }

    /// Public JWK, or `None` for symmetric keys.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        match &self.public_key_data {
            PublicKeyData::Symmetric => None,
            PublicKeyData::Rsa { n, e } => Some(Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            }),
            PublicKeyData::Ec { x, y } => Some(Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            }),
        }
    }
}

fn derive_kid(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    URL_SAFE_NO_PAD.encode(&hasher.finalize()[..12])
}

// ============================================================================
// JWT Service
// ============================================================================

/// Signs and verifies access tokens with a single key.
pub struct JwtService {
    signing_key: SigningKey,
    issuer: String,
    clock_skew: Duration,
}

impl JwtService {
    #[must_use]
    pub fn new(signing_key: SigningKey, issuer: impl Into<String>, clock_skew: Duration) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
            clock_skew,
        }
    }

    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key).map_err(|e| {
            JwtError::EncodingError {
                message: e.to_string(),
            }
        })
    }

    /// Verifies signature, issuer and expiry.
    ///
    /// The signature is checked first, so a forged token never reports
    /// [`JwtError::Expired`] and an expired genuine token never reports a
    /// signature error. Audience is left to the caller.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();

        decode(token, &self.signing_key.decoding_key, &validation).map_err(JwtError::from)
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Leeway applied to `exp` checks.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.signing_key.to_jwk().into_iter().collect(),
        }
    }
}
