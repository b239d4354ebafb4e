//! Key-prefixed JSON cache with a distributed lock.
//!
//! [`CacheStore`] is the raw protocol (string values, Redis semantics);
//! [`RedisStore`](crate::redis_store::RedisStore) implements it for production
//! and [`MemoryStore`](crate::memory_store::MemoryStore) for tests and local
//! runs. [`Cache`] layers key prefixing, JSON (de)serialization and
//! [`Cache::with_lock`] on top.
//!
//! Locks use `SET key token NX EX ttl` to acquire and an atomic
//! compare-and-delete to release, so a holder whose lease expired can never
//! delete the lock of whoever took it over.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use salon_common::error::CacheError;

/// Flags for a `set` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire the key after this many seconds.
    pub ttl_seconds: Option<u64>,
    /// Only write when the key does not exist yet (`NX`).
    pub only_if_not_exists: bool,
}

impl SetOptions {
    pub fn ttl(seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(seconds),
            only_if_not_exists: false,
        }
    }

    pub fn if_not_exists(mut self) -> Self {
        self.only_if_not_exists = true;
        self
    }
}

/// Raw key-value protocol with Redis semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Returns whether the write happened (an `NX` write on an existing key does not).
    async fn set(&self, key: &str, value: String, options: SetOptions)
    -> Result<bool, CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Atomic `incr` that also sets a `ttl_seconds` expiry when the key has none.
    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, CacheError>;

    /// Remaining lifetime in seconds; `-2` when the key is missing, `-1` when it never expires.
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;

    /// Returns whether the key existed.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, CacheError>;

    /// Delete `key` only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError>;
}

/// Prefixed, typed view over a [`CacheStore`]. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(&self.key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.key(key), raw, options).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(&self.key(key)).await
    }

    pub async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.store.incr(&self.key(key)).await
    }

    /// Count into a fixed window: the first increment starts a `ttl_seconds`
    /// expiry and later ones leave it alone.
    pub async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, CacheError> {
        self.store.incr_with_ttl(&self.key(key), ttl_seconds).await
    }

    /// Remaining lifetime in seconds, or `None` for a missing or persistent key.
    pub async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let ttl = self.store.ttl(&self.key(key)).await?;
        Ok(u64::try_from(ttl).ok())
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool, CacheError> {
        self.store.expire(&self.key(key), seconds).await
    }

    /// Run `task` while holding the lock named `key`.
    ///
    /// Fails with [`CacheError::LockNotAcquired`] without calling `task` when
    /// someone else holds the lock. Otherwise the lock is released after
    /// `task` finishes, whether it succeeded, failed or panicked, and its
    /// result is returned (a panic is resumed after the release). A failed
    /// release is logged and left to the TTL.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        task: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        let lock_key = self.key(key);
        let token = Uuid::new_v4().to_string();

        let acquired = self
            .store
            .set(
                &lock_key,
                token.clone(),
                SetOptions::ttl(ttl_seconds).if_not_exists(),
            )
            .await?;
        if !acquired {
            tracing::debug!(lock = %lock_key, "Lock held elsewhere");
            return Err(CacheError::LockNotAcquired(key.to_string()).into());
        }
        tracing::debug!(lock = %lock_key, ttl_seconds, "Lock acquired");

        let outcome = AssertUnwindSafe(task()).catch_unwind().await;

        match self.store.compare_and_delete(&lock_key, &token).await {
            Ok(true) => tracing::debug!(lock = %lock_key, "Lock released"),
            Ok(false) => tracing::warn!(
                lock = %lock_key,
                ttl_seconds,
                "Lock expired before release; left to its current owner"
            ),
            Err(e) => tracing::warn!(lock = %lock_key, error = %e, "Failed to release lock"),
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
