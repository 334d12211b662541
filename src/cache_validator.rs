use crate::models::TaxpayerRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A cached record stored as JSON together with its insertion time and a
/// SHA-256 checksum of that JSON.
///
/// Entries are kept in the cache in serialized form. On every read the blob is
/// parsed and the checksum recomputed; anything that fails to parse or no
/// longer matches is treated as a miss and the identifier is looked up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCacheEntry {
    /// The JSON-serialized record
    pub data: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of `data` (hex encoded)
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(record: &TaxpayerRecord, created_at: DateTime<Utc>) -> Self {
        let data = serde_json::to_string(record).unwrap_or_default();
        let checksum = Self::compute_checksum(&data);
        Self {
            data,
            created_at,
            checksum,
        }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum still matches the data
    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Serializes the entry for storage in the cache
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a stored entry, returning it only if its checksum matches
    pub fn deserialize_and_validate(serialized: &str) -> Option<Self> {
        let entry: ValidatedCacheEntry = match serde_json::from_str(serialized) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cache validation failed: unreadable entry: {}", e);
                return None;
            }
        };

        if entry.is_valid() {
            Some(entry)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}",
                entry.checksum
            );
            None
        }
    }

    /// Decodes the cached record
    pub fn record(&self) -> Option<TaxpayerRecord> {
        serde_json::from_str(&self.data).ok()
    }
}
