//! In-process [`CacheStore`] for tests and single-instance development.
//!
//! Mirrors the Redis semantics the cache relies on: `SET` replaces any TTL,
//! `INCR` keeps it, and the `TTL` sentinels are `-2` (missing) and `-1`
//! (no expiry). Expiry uses `tokio::time::Instant`, so tests can drive it with
//! a paused clock. Reads purge the key they touch; writes sweep every expired
//! entry, so keys that are never read again do not pile up.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use salon_common::error::CacheError;

use crate::cache::{CacheStore, SetOptions};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the map with `key` purged if it has expired.
    fn live(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut entries = self.entries();
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
        entries
    }

    /// Lock the map with every expired entry swept out.
    fn swept(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut entries = self.entries();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries
    }
}

fn increment(entry: &mut Entry, key: &str) -> Result<i64, CacheError> {
    let current: i64 = entry
        .value
        .parse()
        .map_err(|_| CacheError::Store(format!("value at {} is not an integer", key)))?;
    let next = current + 1;
    entry.value = next.to_string();
    Ok(next)
}

fn zero() -> Entry {
    Entry {
        value: "0".to_string(),
        expires_at: None,
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live(key).get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        options: SetOptions,
    ) -> Result<bool, CacheError> {
        let mut entries = self.swept();
        if options.only_if_not_exists && entries.contains_key(key) {
            return Ok(false);
        }
        let expires_at = options
            .ttl_seconds
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).remove(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut entries = self.swept();
        increment(entries.entry(key.to_string()).or_insert_with(zero), key)
    }

    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, CacheError> {
        let mut entries = self.swept();
        let entry = entries.entry(key.to_string()).or_insert_with(zero);
        let next = increment(entry, key)?;
        if entry.expires_at.is_none() {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let entries = self.live(key);
        let Some(entry) = entries.get(key) else {
            return Ok(-2);
        };
        Ok(match entry.expires_at {
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                ((remaining.as_millis() + 500) / 1000) as i64
            }
            None => -1,
        })
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, CacheError> {
        let mut entries = self.live(key);
        Ok(match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                true
            }
            None => false,
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut entries = self.live(key);
        if entries.get(key).is_some_and(|entry| entry.value == expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}
