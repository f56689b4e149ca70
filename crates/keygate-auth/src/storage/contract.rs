//! Conformance suite for [`StateStore`] backends.
//!
//! Every backend must pass [`run_all`]. Keys are namespaced with a random
//! prefix so the suite can share a store with other tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use super::{StateStore, keys};

fn scoped(name: &str) -> String {
    format!("contract-{}:{name}", uuid::Uuid::new_v4())
}

/// Runs every check against the given store.
pub async fn run_all(store: Arc<dyn StateStore>) {
    get_put_delete(store.as_ref()).await;
    put_if_absent_only_once(store.as_ref()).await;
    ttl_expires_entries(store.as_ref()).await;
    compare_and_swap_semantics(store.as_ref()).await;
    compare_and_swap_keeps_ttl(store.as_ref()).await;
    increment_counts_within_window(store.as_ref()).await;
    concurrent_compare_and_swap_has_one_winner(store.clone()).await;
    concurrent_increment_never_loses_updates(store.clone()).await;
}

/// Plain reads, writes and deletes.
pub async fn get_put_delete(store: &dyn StateStore) {
    let key = scoped("plain");
    assert_eq!(store.get(&key).await.unwrap(), None);

    store.put(&key, b"one", None).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(&b"one"[..]));

    store.put(&key, b"two", None).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(&b"two"[..]));

    assert!(store.delete(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
}

/// Only the first writer creates the entry.
pub async fn put_if_absent_only_once(store: &dyn StateStore) {
    let key = scoped("nx");
    assert!(store.put_if_absent(&key, b"first", None).await.unwrap());
    assert!(!store.put_if_absent(&key, b"second", None).await.unwrap());
    assert_eq!(
        store.get(&key).await.unwrap().as_deref(),
        Some(&b"first"[..])
    );
}

/// Entries disappear after their TTL and may then be recreated.
pub async fn ttl_expires_entries(store: &dyn StateStore) {
    let key = scoped("ttl");
    store
        .put(&key, b"v", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(store.get(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.get(&key).await.unwrap(), None);
    assert!(
        !store
            .compare_and_swap(&key, b"v", b"w", None)
            .await
            .unwrap()
    );
    assert!(store.put_if_absent(&key, b"again", None).await.unwrap());
}

/// Swaps only on an exact match; missing keys never match.
pub async fn compare_and_swap_semantics(store: &dyn StateStore) {
    let key = scoped("cas");
    assert!(
        !store
            .compare_and_swap(&key, b"a", b"b", None)
            .await
            .unwrap()
    );

    store.put(&key, b"a", None).await.unwrap();
    assert!(
        !store
            .compare_and_swap(&key, b"x", b"b", None)
            .await
            .unwrap()
    );
    assert!(
        store
            .compare_and_swap(&key, b"a", b"b", None)
            .await
            .unwrap()
    );
    assert!(
        !store
            .compare_and_swap(&key, b"a", b"c", None)
            .await
            .unwrap()
    );
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(&b"b"[..]));
}

/// A swap without TTL keeps the existing expiry.
pub async fn compare_and_swap_keeps_ttl(store: &dyn StateStore) {
    let key = scoped("cas-ttl");
    store
        .put(&key, b"a", Some(Duration::from_millis(150)))
        .await
        .unwrap();
    assert!(
        store
            .compare_and_swap(&key, b"a", b"b", None)
            .await
            .unwrap()
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get(&key).await.unwrap(), None);
}

/// Counters start at one, keep their first expiry, and reset afterwards.
pub async fn increment_counts_within_window(store: &dyn StateStore) {
    let key = keys::rate_limit(&scoped("incr"), 0);
    let window = Duration::from_millis(200);

    let first = store.increment(&key, window).await.unwrap();
    assert_eq!(first.value, 1);
    assert!(first.ttl <= window);

    let second = store.increment(&key, Duration::from_secs(60)).await.unwrap();
    assert_eq!(second.value, 2);
    assert!(second.ttl <= window);

    tokio::time::sleep(Duration::from_millis(350)).await;
    let fresh = store.increment(&key, window).await.unwrap();
    assert_eq!(fresh.value, 1);
}

/// Racing swaps from the same expected value: exactly one wins.
pub async fn concurrent_compare_and_swap_has_one_winner(store: Arc<dyn StateStore>) {
    let key = scoped("cas-race");
    store.put(&key, b"unused", None).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..16u8 {
        let store = store.clone();
        let key = key.clone();
        tasks.spawn(async move {
            store
                .compare_and_swap(&key, b"unused", &[b'w', i], None)
                .await
                .unwrap()
        });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

/// Racing increments are all counted.
pub async fn concurrent_increment_never_loses_updates(store: Arc<dyn StateStore>) {
    let key = scoped("incr-race");

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let store = store.clone();
        let key = key.clone();
        tasks.spawn(async move {
            store
                .increment(&key, Duration::from_secs(60))
                .await
                .unwrap()
                .value
        });
    }

    let mut seen = Vec::new();
    while let Some(result) = tasks.join_next().await {
        seen.push(result.unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=32).collect::<Vec<u64>>());
}
