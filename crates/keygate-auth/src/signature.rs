//! secp256k1 ECDSA verification for keypair logins.
//!
//! Accepts SEC1 public keys in compressed (33 byte) or uncompressed (65 byte)
//! form and signatures in compact (64 byte `r || s`) or DER encoding. Users
//! are identified by the compressed hex form of their key, so the same key
//! always maps to the same identity regardless of how it was submitted.
//!
//! Malformed input is reported as [`SignatureError::InvalidInput`]; a
//! well-formed signature from the wrong key is `Ok(false)`. Callers rely on
//! the two staying distinct.

use std::fmt;

use k256::ecdsa::signature::Verifier;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};

use crate::AuthError;

/// Compact signature length.
const COMPACT_SIGNATURE_LEN: usize = 64;

/// Pre-hashed digest length (SHA-256).
const DIGEST_LEN: usize = 32;

/// Errors from parsing keys and signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The key, signature or digest bytes are malformed.
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// What could not be parsed.
        reason: String,
    },
}

impl SignatureError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

impl From<SignatureError> for AuthError {
    fn from(err: SignatureError) -> Self {
        AuthError::invalid_request(err.to_string())
    }
}

/// A parsed secp256k1 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parses a SEC1-encoded key (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        match bytes.len() {
            33 | 65 => VerifyingKey::from_sec1_bytes(bytes)
                .map(|key| Self { key })
                .map_err(|_| SignatureError::invalid("public key is not a valid curve point")),
            n => Err(SignatureError::invalid(format!(
                "public key must be 33 or 65 bytes, got {n}"
            ))),
        }
    }

    /// Parses a hex-encoded SEC1 key.
    pub fn from_hex(hex_key: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| SignatureError::invalid("public key is not valid hex"))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Compressed SEC1 encoding as lowercase hex. This is the user identifier.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_encoded_point(true).as_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// DER `SEQUENCE` tag.
const DER_SEQUENCE_TAG: u8 = 0x30;

/// Parses a compact or DER signature, normalizing high-S values.
///
/// A 64 byte DER encoding is possible when `r` and `s` are short, so DER is
/// tried first whenever the input starts with a sequence tag.
pub fn parse_signature(bytes: &[u8]) -> Result<Signature, SignatureError> {
    let der = (bytes.first() == Some(&DER_SEQUENCE_TAG))
        .then(|| Signature::from_der(bytes).ok())
        .flatten();
    let signature = match der {
        Some(signature) => signature,
        None if bytes.len() == COMPACT_SIGNATURE_LEN => Signature::from_slice(bytes)
            .map_err(|_| SignatureError::invalid("signature is neither compact nor DER"))?,
        None => return Err(SignatureError::invalid("signature is neither compact nor DER")),
    };

    Ok(signature.normalize_s().unwrap_or(signature))
}

fn decode_hex(label: &str, value: &str) -> Result<Vec<u8>, SignatureError> {
    hex::decode(value.trim())
        .map_err(|_| SignatureError::invalid(format!("{label} is not valid hex")))
}

/// Verifies a signature over `message` (SHA-256 is applied here).
pub fn verify_message(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, SignatureError> {
    let signature = parse_signature(signature)?;
    Ok(public_key.key.verify(message, &signature).is_ok())
}

/// Verifies a signature over a 32-byte digest that was signed as-is.
///
/// LNURL-auth wallets sign the raw k1 bytes this way.
pub fn verify_digest(
    public_key: &PublicKey,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, SignatureError> {
    if digest.len() != DIGEST_LEN {
        return Err(SignatureError::invalid(format!(
            "digest must be {DIGEST_LEN} bytes, got {}",
            digest.len()
        )));
    }
    let signature = parse_signature(signature)?;
    Ok(public_key
        .key
        .verify_prehash(digest, &signature)
        .is_ok())
}

/// Hex-input variant of [`verify_digest`] used by the challenge flow.
///
/// Returns the parsed key alongside the result so callers can bind the
/// normalized identity.
pub fn verify_challenge_hex(
    public_key_hex: &str,
    k1_hex: &str,
    signature_hex: &str,
) -> Result<(PublicKey, bool), SignatureError> {
    let public_key = PublicKey::from_hex(public_key_hex)?;
    let digest = decode_hex("k1", k1_hex)?;
    let signature = decode_hex("signature", signature_hex)?;
    let valid = verify_digest(&public_key, &digest, &signature)?;
    Ok((public_key, valid))
}

#[cfg(test)]
pub(crate) mod test_support {
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::{Signature, SigningKey};
    use rand::rngs::OsRng;

    /// A wallet keypair for tests.
    pub struct TestWallet {
        pub signing_key: SigningKey,
    }

    impl TestWallet {
        pub fn generate() -> Self {
            Self {
                signing_key: SigningKey::random(&mut OsRng),
            }
        }

        pub fn public_key_hex(&self) -> String {
            hex::encode(
                self.signing_key
                    .verifying_key()
                    .to_encoded_point(true)
                    .as_bytes(),
            )
        }

        pub fn uncompressed_public_key_hex(&self) -> String {
            hex::encode(
                self.signing_key
                    .verifying_key()
                    .to_encoded_point(false)
                    .as_bytes(),
            )
        }

        pub fn sign_k1(&self, k1_hex: &str) -> String {
            let digest = hex::decode(k1_hex).unwrap();
            let signature: Signature = self.signing_key.sign_prehash(&digest).unwrap();
            hex::encode(signature.to_der().as_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestWallet;
    use super::*;
    use k256::ecdsa::signature::Signer;
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    #[test]
    fn test_short_scalar_der_signature_of_compact_length() {
        let mut r = [0u8; 32];
        r[3] = 0x01;
        r[31] = 0x05;
        let mut s = [0u8; 32];
        s[3] = 0x02;
        s[31] = 0x07;
        let signature = Signature::from_scalars(
            k256::FieldBytes::clone_from_slice(&r),
            k256::FieldBytes::clone_from_slice(&s),
        )
        .unwrap();

        let der = signature.to_der();
        assert_eq!(der.as_bytes().len(), COMPACT_SIGNATURE_LEN);
        assert_eq!(parse_signature(der.as_bytes()).unwrap(), signature);
        assert_eq!(parse_signature(&signature.to_bytes()).unwrap(), signature);
    }

    #[test]
    fn test_compressed_and_uncompressed_keys_normalize_to_same_id() {
        let wallet = TestWallet::generate();
        let compressed = PublicKey::from_hex(&wallet.public_key_hex()).unwrap();
        let uncompressed = PublicKey::from_hex(&wallet.uncompressed_public_key_hex()).unwrap();

        assert_eq!(compressed.to_hex(), uncompressed.to_hex());
        assert_eq!(compressed.to_hex().len(), 66);
    }

    #[test]
    fn test_verify_message_compact_and_der() {
        let wallet = TestWallet::generate();
        let key = PublicKey::from_hex(&wallet.public_key_hex()).unwrap();
        let signature: Signature = wallet.signing_key.sign(b"hello keygate");

        let compact = signature.to_bytes();
        assert!(verify_message(&key, b"hello keygate", &compact).unwrap());

        let der = signature.to_der();
        assert!(verify_message(&key, b"hello keygate", der.as_bytes()).unwrap());
    }

    #[test]
    fn test_wrong_signer_is_false_not_error() {
        let signer = TestWallet::generate();
        let other = TestWallet::generate();
        let other_key = PublicKey::from_hex(&other.public_key_hex()).unwrap();
        let signature: Signature = signer.signing_key.sign(b"msg");

        assert_eq!(
            verify_message(&other_key, b"msg", &signature.to_bytes()),
            Ok(false)
        );
        assert_eq!(
            verify_message(&other_key, b"different", &signature.to_bytes()),
            Ok(false)
        );
    }

    #[test]
    fn test_malformed_input_is_invalid_input() {
        let wallet = TestWallet::generate();
        let key = PublicKey::from_hex(&wallet.public_key_hex()).unwrap();

        assert!(matches!(
            PublicKey::from_hex("zz"),
            Err(SignatureError::InvalidInput { .. })
        ));
        assert!(matches!(
            PublicKey::from_sec1_bytes(&[2u8; 20]),
            Err(SignatureError::InvalidInput { .. })
        ));
        assert!(matches!(
            verify_message(&key, b"msg", &[1, 2, 3]),
            Err(SignatureError::InvalidInput { .. })
        ));
        assert!(matches!(
            verify_digest(&key, b"short", &[0u8; 64]),
            Err(SignatureError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_high_s_signature_is_accepted() {
        let wallet = TestWallet::generate();
        let key = PublicKey::from_hex(&wallet.public_key_hex()).unwrap();
        let digest = [7u8; 32];
        let low: Signature = wallet.signing_key.sign_prehash(&digest).unwrap();

        let high = Signature::from_scalars(low.r().to_bytes(), (-*low.s()).to_bytes()).unwrap();
        assert!(high.normalize_s().is_some());

        assert!(verify_digest(&key, &digest, &high.to_bytes()).unwrap());
    }

    #[test]
    fn test_verify_challenge_hex() {
        let wallet = TestWallet::generate();
        let k1 = hex::encode([9u8; 32]);
        let sig = wallet.sign_k1(&k1);

        let (key, valid) =
            verify_challenge_hex(&wallet.uncompressed_public_key_hex(), &k1, &sig).unwrap();
        assert!(valid);
        assert_eq!(key.to_hex(), wallet.public_key_hex());

        let other_k1 = hex::encode([8u8; 32]);
        let (_, valid) = verify_challenge_hex(&wallet.public_key_hex(), &other_k1, &sig).unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_signature_error_maps_to_invalid_request() {
        let err: AuthError = SignatureError::invalid("bad").into();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }
}
