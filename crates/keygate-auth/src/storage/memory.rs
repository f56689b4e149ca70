//! In-process [`StateStore`] backed by a sharded concurrent map.
//!
//! Every operation runs under the shard lock for its key, which makes each
//! call atomic within one process. Use the Redis backend when more than one
//! worker process serves traffic.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use super::{Counter, StateStore};
use crate::{AuthError, AuthResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &[u8], ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Memory-backed state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Starts a background task that purges expired entries every `every`.
    ///
    /// The task holds a weak reference and ends once the store is dropped.
    pub fn start_purge_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired state entries");
                }
            }
        })
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Returns `true` if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> AuthResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AuthResult<()> {
        self.entries
            .insert(key.to_owned(), Entry::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Entry::new(value, ttl, now));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, ttl, now));
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return Ok(false);
                }
                let entry = occupied.get_mut();
                if entry.value != expected {
                    return Ok(false);
                }
                entry.value = new.to_vec();
                if let Some(ttl) = ttl {
                    entry.expires_at = Some(now + ttl);
                }
                Ok(true)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn increment(&self, key: &str, ttl: Duration) -> AuthResult<Counter> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(b"0", Some(ttl), now));
        if entry.is_expired(now) {
            *entry = Entry::new(b"0", Some(ttl), now);
        }

        let current: u64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AuthError::storage(format!("value at '{key}' is not a counter")))?;
        let value = current + 1;
        entry.value = value.to_string().into_bytes();

        let remaining = entry
            .expires_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(ttl);

        Ok(Counter {
            value,
            ttl: remaining,
        })
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_store_passes_contract() {
        contract::run_all(std::sync::Arc::new(MemoryStateStore::new())).await;
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStateStore::new();
        store
            .put("short", b"1", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.put("long", b"1", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_task_evicts_and_stops_with_store() {
        let store = Arc::new(MemoryStateStore::new());
        for window in 0..20 {
            store
                .increment(&format!("ratelimit:1.2.3.4:{window}"), Duration::from_millis(10))
                .await
                .unwrap();
        }
        let task = store.start_purge_task(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.entries.len(), 0);

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("purge task ends with the store")
            .unwrap();
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = MemoryStateStore::new();
        store.put("k", b"not a number", None).await.unwrap();
        let err = store.increment("k", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }
}
