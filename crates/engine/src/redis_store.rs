//! Redis-backed [`CacheStore`].
//!
//! Uses `SET key value [NX] [EX ttl]` for conditional writes. Compare-and-delete
//! and increment-with-expiry are Lua scripts, each a single atomic round trip.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use salon_common::error::CacheError;

use crate::cache::{CacheStore, SetOptions};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// Attaches the TTL whenever the counter has none, including counters left
// without one by an older non-atomic INCR + EXPIRE.
const INCR_WITH_TTL: &str = r#"
local count = redis.call("INCR", KEYS[1])
if redis.call("TTL", KEYS[1]) < 0 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

pub struct RedisStore {
    redis: ConnectionManager,
    release_script: redis::Script,
    counter_script: redis::Script,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            release_script: redis::Script::new(COMPARE_AND_DELETE),
            counter_script: redis::Script::new(INCR_WITH_TTL),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut redis = self.redis.clone();
        let value: Option<String> = redis.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        let mut redis = self.redis.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if options.only_if_not_exists {
            cmd.arg("NX");
        }
        if let Some(ttl) = options.ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }

        // Some("OK") when written, None when NX found an existing key
        let result: Option<String> = cmd.query_async(&mut redis).await?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis.del(key).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut redis = self.redis.clone();
        let value: i64 = redis.incr(key, 1).await?;
        Ok(value)
    }

    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, CacheError> {
        let mut redis = self.redis.clone();
        let value: i64 = self
            .counter_script
            .key(key)
            .arg(ttl_seconds)
            .invoke_async(&mut redis)
            .await?;
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut redis = self.redis.clone();
        let ttl: i64 = redis.ttl(key).await?;
        Ok(ttl)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, CacheError> {
        let mut redis = self.redis.clone();
        let seconds = i64::try_from(seconds)
            .map_err(|_| CacheError::Store(format!("expiry out of range: {}", seconds)))?;
        let updated: i64 = redis.expire(key, seconds).await?;
        Ok(updated == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut redis = self.redis.clone();
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut redis)
            .await?;
        Ok(removed == 1)
    }
}
