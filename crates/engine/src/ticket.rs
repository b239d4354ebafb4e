//! Single-use tickets bridging multi-step flows.
//!
//! A ticket is a random id stored under `ticket:{id}` with a short TTL. It is
//! handed to the client after one step (e.g. a verified reset code) and
//! redeemed in the next without re-authenticating.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use salon_common::error::CacheError;

use crate::cache::{Cache, SetOptions};

/// Default ticket lifetime (15 minutes).
pub const DEFAULT_TICKET_TTL_SECONDS: u64 = 15 * 60;

#[derive(Clone)]
pub struct TicketService {
    cache: Cache,
    ttl_seconds: u64,
}

impl TicketService {
    pub fn new(cache: Cache, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    fn key(id: &str) -> String {
        format!("ticket:{}", id)
    }

    /// Store `payload` and return the ticket id.
    pub async fn issue<T: Serialize>(&self, payload: &T) -> Result<String, CacheError> {
        let id = Uuid::new_v4().simple().to_string();
        let written = self
            .cache
            .set(
                &Self::key(&id),
                payload,
                SetOptions::ttl(self.ttl_seconds).if_not_exists(),
            )
            .await?;
        if !written {
            return Err(CacheError::Store(format!("ticket id collision: {}", id)));
        }

        tracing::debug!(ttl_seconds = self.ttl_seconds, "Ticket issued");
        Ok(id)
    }

    /// Redeem a ticket. Returns `None` if it never existed, expired, or was
    /// already redeemed; when two callers race, only one gets the payload.
    pub async fn consume<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, CacheError> {
        let key = Self::key(id);
        let Some(payload) = self.cache.get::<T>(&key).await? else {
            return Ok(None);
        };

        if !self.cache.delete(&key).await? {
            tracing::debug!("Ticket redeemed concurrently by another request");
            return Ok(None);
        }

        Ok(Some(payload))
    }
}
