use keygate_auth::AuthError;

/// Failures talking to Redis.
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    #[error("failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("Redis connection unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("unexpected Redis reply: {0}")]
    UnexpectedReply(String),
}

impl From<RedisStoreError> for AuthError {
    fn from(err: RedisStoreError) -> Self {
        AuthError::storage(err.to_string())
    }
}
