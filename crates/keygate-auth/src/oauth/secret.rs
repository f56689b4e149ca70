//! Client secret generation and Argon2id hashing.
//!
//! Secrets are 256-bit random values with a `kgs_` prefix. Only the PHC
//! hash is stored; the plaintext is returned once at registration or
//! rotation.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;

use crate::AuthError;

/// Generates a new client secret (`kgs_` + 64 hex chars).
#[must_use]
pub fn generate_client_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    format!("kgs_{}", hex::encode(bytes))
}

/// Hashes a secret for storage.
pub fn hash_client_secret(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::internal(format!("failed to hash client secret: {e}")))
}

/// Checks a secret against a stored hash.
///
/// A malformed stored hash is an internal error, not a mismatch.
pub fn verify_client_secret(secret: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AuthError::internal(format!("stored client secret hash is invalid: {e}")))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        let secret = generate_client_secret();
        assert_eq!(secret.len(), 68);
        assert!(secret.starts_with("kgs_"));
        assert_ne!(secret, generate_client_secret());
    }

    #[test]
    fn test_hash_and_verify() {
        let secret = generate_client_secret();
        let hash = hash_client_secret(&secret).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_client_secret(&secret, &hash).unwrap());
        assert!(!verify_client_secret("kgs_wrong", &hash).unwrap());
    }

    #[test]
    fn test_invalid_stored_hash() {
        assert!(matches!(
            verify_client_secret("x", "not-a-phc-string"),
            Err(AuthError::Internal { .. })
        ));
    }
}
