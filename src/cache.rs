//! Result cache for successful extractions.
//!
//! Entries live for a fixed TTL measured from insertion. Expiry is checked
//! lazily on read against the injected [`Clock`]; moka's own `time_to_live`
//! and capacity bound take care of reclaiming memory. Values are stored as
//! checksummed JSON (see [`ValidatedCacheEntry`]).

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::cache_validator::ValidatedCacheEntry;
use crate::clock::{elapsed_since, Clock};
use crate::models::{LookupKey, TaxpayerRecord};

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the cached record, or `None` if absent, expired or corrupted.
    async fn get(&self, key: &LookupKey) -> Option<TaxpayerRecord>;

    /// Stores `record` under `key`; the entry expires one TTL from now.
    async fn put(&self, key: LookupKey, record: TaxpayerRecord);
}

pub struct MokaCacheStore {
    entries: Cache<String, String>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MokaCacheStore {
    pub fn new(ttl: Duration, max_capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self {
            entries,
            ttl,
            clock,
        }
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &LookupKey) -> Option<TaxpayerRecord> {
        let stored = self.entries.get(key.as_str()).await?;

        let Some(entry) = ValidatedCacheEntry::deserialize_and_validate(&stored) else {
            self.entries.invalidate(key.as_str()).await;
            return None;
        };

        if elapsed_since(self.clock.now(), entry.created_at) >= self.ttl {
            tracing::debug!("Cache entry expired for {}", key);
            self.entries.invalidate(key.as_str()).await;
            return None;
        }

        let record = entry.record();
        if record.is_none() {
            tracing::warn!("Cached record for {} could not be decoded", key);
            self.entries.invalidate(key.as_str()).await;
        }
        record
    }

    async fn put(&self, key: LookupKey, record: TaxpayerRecord) {
        let entry = ValidatedCacheEntry::new(&record, self.clock.now());
        self.entries
            .insert(key.as_str().to_string(), entry.serialize())
            .await;
    }
}
