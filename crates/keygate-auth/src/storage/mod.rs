//! Shared state store abstraction.
//!
//! Every piece of mutable state Keygate owns (challenges, authorization
//! codes, refresh tokens, rate-limit counters, revocation markers, users and
//! clients) lives behind [`StateStore`]. Workers hold no state of their own,
//! so all single-use guarantees reduce to the atomic primitives defined here.
//!
//! # Implementations
//!
//! - [`MemoryStateStore`] - single-process backend for development and tests
//! - `keygate-store-redis` - Redis backend for multi-worker deployments
//!
//! Both backends are checked by the same conformance suite
//! (`storage::contract`, behind the `testing` feature).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::AuthResult;

#[cfg(any(test, feature = "testing"))]
pub mod contract;
pub mod memory;

pub use memory::MemoryStateStore;

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub value: u64,
    /// Time until the counter expires.
    pub ttl: Duration,
}

/// Key/value store with expiry and atomic primitives.
///
/// Values are opaque bytes. Implementations must make each method a single
/// atomic operation with respect to concurrent callers in any process.
///
/// TTL semantics: `Some(ttl)` sets a fresh expiry, `None` on [`put`] means
/// "never expires" and on [`compare_and_swap`] means "keep the current
/// expiry".
///
/// [`put`]: StateStore::put
/// [`compare_and_swap`]: StateStore::compare_and_swap
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> AuthResult<Option<Vec<u8>>>;

    /// Writes a value unconditionally.
    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AuthResult<()>;

    /// Writes a value only if the key is absent or expired.
    ///
    /// Returns `true` if this call created the entry.
    async fn put_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool>;

    /// Replaces the value only if it currently equals `expected`.
    ///
    /// Returns `true` if the swap happened. A missing or expired key never
    /// matches.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool>;

    /// Atomically increments a counter.
    ///
    /// The first increment of an absent key creates it with value 1 and
    /// expiry `ttl`; later increments keep the original expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> AuthResult<Counter>;

    /// Deletes a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> AuthResult<bool>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> AuthResult<()> {
        Ok(())
    }
}

/// A decoded record together with the exact bytes it was read from.
///
/// Pass it back to [`swap_json`] so the compare-and-swap compares against
/// what was actually read.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// Decoded value.
    pub value: T,
    raw: Vec<u8>,
}

impl<T> Versioned<T> {
    /// Raw bytes the value was decoded from.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Loads and decodes a JSON record.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> AuthResult<Option<Versioned<T>>> {
    match store.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_slice(&raw)?;
            Ok(Some(Versioned { value, raw }))
        }
        None => Ok(None),
    }
}

/// Encodes and stores a JSON record only if the key is free.
pub async fn insert_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> AuthResult<bool> {
    let bytes = serde_json::to_vec(value)?;
    store.put_if_absent(key, &bytes, ttl).await
}

/// Encodes and stores a JSON record unconditionally.
pub async fn put_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> AuthResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes, ttl).await
}

/// Replaces a previously loaded record if nobody changed it in between.
pub async fn swap_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    current: &Versioned<T>,
    new: &T,
    ttl: Option<Duration>,
) -> AuthResult<bool> {
    let bytes = serde_json::to_vec(new)?;
    store.compare_and_swap(key, &current.raw, &bytes, ttl).await
}

/// Store key layout.
pub mod keys {
    /// Challenge record by session id.
    #[must_use]
    pub fn challenge(session_id: &str) -> String {
        format!("challenge:{session_id}")
    }

    /// Index from k1 to session id.
    #[must_use]
    pub fn challenge_k1(k1: &str) -> String {
        format!("challenge-k1:{k1}")
    }

    /// User record by normalized public key.
    #[must_use]
    pub fn user(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// Registered client.
    #[must_use]
    pub fn client(client_id: &str) -> String {
        format!("client:{client_id}")
    }

    /// Authorization code by SHA-256 hash.
    #[must_use]
    pub fn code(code_hash: &str) -> String {
        format!("code:{code_hash}")
    }

    /// Refresh token by SHA-256 hash.
    #[must_use]
    pub fn refresh(token_hash: &str) -> String {
        format!("refresh:{token_hash}")
    }

    /// Revoked access token id.
    #[must_use]
    pub fn revoked_jti(jti: &str) -> String {
        format!("revoked-jti:{jti}")
    }

    /// Revoked token family.
    #[must_use]
    pub fn revoked_family(family_id: &str) -> String {
        format!("revoked-family:{family_id}")
    }

    /// Rate-limit window counter.
    #[must_use]
    pub fn rate_limit(subject: &str, window_start: i64) -> String {
        format!("ratelimit:{subject}:{window_start}")
    }

    /// Audit entry.
    #[must_use]
    pub fn audit(timestamp_nanos: i128, event_id: &str) -> String {
        format!("audit:{timestamp_nanos:024}:{event_id}")
    }
}
