use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use keygate_auth::AuthResult;
use keygate_auth::storage::{Counter, StateStore};
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use crate::config::RedisStoreConfig;
use crate::error::RedisStoreError;

// KEYS[1] key, ARGV[1] expected, ARGV[2] new value, ARGV[3] ttl in ms or "".
const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
  return 0
end
if ARGV[3] == '' then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
else
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
end
return 1
";

// KEYS[1] counter, ARGV[1] window in ms. Returns {value, remaining ttl ms}.
const INCREMENT_IN_WINDOW: &str = r"
local value = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {value, ttl}
";

/// [`StateStore`] backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisStateStore {
    pool: Pool,
    prefix: String,
    compare_and_swap: Script,
    increment: Script,
}

impl RedisStateStore {
    /// Wraps an existing pool.
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
            increment: Script::new(INCREMENT_IN_WINDOW),
        }
    }

    /// Creates the pool and checks that Redis answers.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, RedisStoreError> {
        info!(url = %config.url, "Connecting to Redis state store");

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = redis_config.get_pool_config();
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(config.timeout);
        pool_config.timeouts.create = Some(config.timeout);
        pool_config.timeouts.recycle = Some(config.timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        let store = Self::new(pool, config.key_prefix.clone());
        store.ping_inner().await?;

        info!("Connected to Redis state store");
        Ok(store)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    async fn conn(&self) -> Result<Connection, RedisStoreError> {
        Ok(self.pool.get().await?)
    }

    async fn ping_inner(&self) -> Result<(), RedisStoreError> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(RedisStoreError::UnexpectedReply(reply))
        }
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Vec<u8>>, RedisStoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set_inner(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> Result<bool, RedisStoreError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if only_if_absent {
            cmd.arg("NX");
        }
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap_inner(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, RedisStoreError> {
        let mut conn = self.conn().await?;
        let ttl_arg = ttl.map(|ttl| ttl_millis(ttl).to_string()).unwrap_or_default();
        let swapped: i64 = self
            .compare_and_swap
            .key(self.key(key))
            .arg(expected)
            .arg(new)
            .arg(ttl_arg)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn increment_inner(&self, key: &str, ttl: Duration) -> Result<Counter, RedisStoreError> {
        let mut conn = self.conn().await?;
        let reply: Vec<i64> = self
            .increment
            .key(self.key(key))
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        let &[value, ttl_ms] = reply.as_slice() else {
            return Err(RedisStoreError::UnexpectedReply(format!("{reply:?}")));
        };
        debug!(key = %key, value, ttl_ms, "Counter incremented");
        Ok(Counter {
            value: u64::try_from(value).unwrap_or_default(),
            ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or_default()),
        })
    }

    async fn delete_inner(&self, key: &str) -> Result<bool, RedisStoreError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> AuthResult<Option<Vec<u8>>> {
        Ok(self.get_inner(key).await?)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AuthResult<()> {
        self.set_inner(key, value, ttl, false).await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        Ok(self.set_inner(key, value, ttl, true).await?)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        Ok(self.compare_and_swap_inner(key, expected, new, ttl).await?)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> AuthResult<Counter> {
        Ok(self.increment_inner(key, ttl).await?)
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        Ok(self.delete_inner(key).await?)
    }

    async fn ping(&self) -> AuthResult<()> {
        Ok(self.ping_inner().await?)
    }
}

/// Redis rejects `PX 0`; anything shorter than a millisecond rounds up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
