use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for [`RedisStateStore`](crate::RedisStateStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Wait, create and recycle timeout for pooled connections
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Prefix prepended to every key, so one Redis can host several deployments
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            timeout: Duration::from_secs(5),
            key_prefix: "keygate:".to_string(),
        }
    }
}
