//! PKCE (RFC 7636), S256 only.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::AuthError;

/// PKCE failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    #[error("Invalid verifier characters: must be unreserved ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    #[error("Invalid challenge format: must be 43 characters of base64url")]
    InvalidChallengeFormat,

    #[error("Unsupported challenge method: {0}. Only S256 is supported.")]
    UnsupportedMethod(String),

    #[error("PKCE verification failed")]
    VerificationFailed,
}

impl PkceError {
    /// Returns `true` for problems detected at the token endpoint.
    #[must_use]
    pub fn is_verifier_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVerifierLength(_)
                | Self::InvalidVerifierCharacters
                | Self::VerificationFailed
        )
    }
}

impl From<PkceError> for AuthError {
    fn from(err: PkceError) -> Self {
        if err.is_verifier_error() {
            AuthError::invalid_grant(err.to_string())
        } else {
            AuthError::invalid_request(err.to_string())
        }
    }
}

/// Challenge method. `plain` is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    #[default]
    S256,
}

impl PkceMethod {
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        "S256"
    }
}

/// A client-held code verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Validates length and character set.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        if !(43..=128).contains(&verifier.len()) {
            return Err(PkceError::InvalidVerifierLength(verifier.len()));
        }
        if !verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// Random 256-bit verifier.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A stored S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Parses a challenge sent by the client.
    pub fn new(challenge: impl Into<String>) -> Result<Self, PkceError> {
        let challenge = challenge.into();
        match URL_SAFE_NO_PAD.decode(&challenge) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(challenge)),
            _ => Err(PkceError::InvalidChallengeFormat),
        }
    }

    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let digest = Sha256::digest(verifier.as_str().as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Checks a verifier against this challenge.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        if Self::from_verifier(verifier).0 == self.0 {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(
            challenge.as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert!(challenge.verify(&verifier).is_ok());
    }

    #[test]
    fn test_generated_verifier_round_trips() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(PkceVerifier::new(verifier.as_str()).is_ok());
    }

    #[test]
    fn test_wrong_verifier_fails() {
        let challenge = PkceChallenge::from_verifier(&PkceVerifier::generate());
        let other = PkceVerifier::generate();
        assert_eq!(challenge.verify(&other), Err(PkceError::VerificationFailed));

        let err: AuthError = PkceError::VerificationFailed.into();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[test]
    fn test_verifier_validation() {
        assert_eq!(
            PkceVerifier::new("short"),
            Err(PkceError::InvalidVerifierLength(5))
        );
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(PkceVerifier::new("a".repeat(129)).is_err());
        assert_eq!(
            PkceVerifier::new(format!("{}!", "a".repeat(43))),
            Err(PkceError::InvalidVerifierCharacters)
        );
    }

    #[test]
    fn test_challenge_format() {
        assert!(PkceChallenge::new("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM").is_ok());
        assert_eq!(
            PkceChallenge::new("not base64!"),
            Err(PkceError::InvalidChallengeFormat)
        );
        assert_eq!(
            PkceChallenge::new("abc"),
            Err(PkceError::InvalidChallengeFormat)
        );

        let err: AuthError = PkceError::InvalidChallengeFormat.into();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[test]
    fn test_method_plain_rejected() {
        assert_eq!(PkceMethod::parse("S256"), Ok(PkceMethod::S256));
        assert!(matches!(
            PkceMethod::parse("plain"),
            Err(PkceError::UnsupportedMethod(_))
        ));
    }
}
