//! Integration tests for the Redis state store.
//!
//! Tests use testcontainers to spin up a real Redis instance and run the
//! same conformance suite as the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use keygate_auth::storage::{StateStore, contract};
use keygate_store_redis::{RedisStateStore, RedisStoreConfig};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");

            (container, url)
        })
        .await;

    url.clone()
}

async fn connect(prefix: &str) -> RedisStateStore {
    let config = RedisStoreConfig {
        url: get_redis_url().await,
        key_prefix: prefix.to_string(),
        ..Default::default()
    };
    RedisStateStore::connect(&config)
        .await
        .expect("connect to redis")
}

#[tokio::test]
async fn test_redis_store_passes_contract() {
    let store = connect("contract:").await;
    contract::run_all(Arc::new(store)).await;
}

#[tokio::test]
async fn test_prefixes_isolate_deployments() {
    let a = connect(&format!("{}:", uuid::Uuid::new_v4())).await;
    let b = connect(&format!("{}:", uuid::Uuid::new_v4())).await;

    a.put("shared-key", b"from-a", None).await.unwrap();
    assert_eq!(b.get("shared-key").await.unwrap(), None);
    assert!(b.put_if_absent("shared-key", b"from-b", None).await.unwrap());
    assert_eq!(
        a.get("shared-key").await.unwrap().as_deref(),
        Some(&b"from-a"[..])
    );
}

#[tokio::test]
async fn test_compare_and_swap_with_ttl_replaces_expiry() {
    let store = connect(&format!("{}:", uuid::Uuid::new_v4())).await;

    store.put("k", b"a", None).await.unwrap();
    assert!(
        store
            .compare_and_swap("k", b"a", b"b", Some(Duration::from_millis(100)))
            .await
            .unwrap()
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_ping_and_unreachable_server() {
    let store = connect("ping:").await;
    store.ping().await.unwrap();

    let config = RedisStoreConfig {
        url: "redis://127.0.0.1:1".to_string(),
        timeout: Duration::from_millis(200),
        ..Default::default()
    };
    assert!(RedisStateStore::connect(&config).await.is_err());
}
