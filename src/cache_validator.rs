use hex;
use sha2::{Digest, Sha256};

/// Integrity wrapper for import-draft cache entries.
///
/// Parsed-but-unconfirmed uploads sit in the draft cache until an
/// administrator confirms or the TTL expires. Entries carry a SHA-256
/// checksum computed at insert time and validated at read time; a corrupted
/// entry reads as a miss and the draft must be re-uploaded.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// The cached draft payload (JSON string).
    pub data: String,
    /// SHA-256 checksum of the payload (hex encoded).
    pub checksum: String,
}

impl ValidatedCacheEntry {
    /// Wrap a payload with its computed checksum.
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the stored checksum still matches the payload.
    pub fn is_valid(&self) -> bool {
        let computed = Self::compute_checksum(&self.data);
        computed == self.checksum
    }

    /// Serialize for storage in the cache.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize and validate a cache entry. Returns the payload when the
    /// checksum holds, `None` for corrupted or unparseable entries.
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Draft cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}
