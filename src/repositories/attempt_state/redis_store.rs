use async_trait::async_trait;
use redis::RedisError;

use super::{AttemptStateStore, StoreError};
use crate::core::redis::RedisHandle;

#[derive(Clone)]
pub(crate) struct RedisStateStore {
    redis: RedisHandle,
    ttl_seconds: u64,
}

impl RedisStateStore {
    pub(crate) fn new(redis: RedisHandle, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl AttemptStateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.redis.get(key).await.map_err(map_redis_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.redis.set(key, value, self.ttl_seconds).await.map_err(map_redis_error)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.redis.set_nx(key, value, self.ttl_seconds).await.map_err(map_redis_error)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.redis.del(key).await.map_err(map_redis_error)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
