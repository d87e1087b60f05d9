//! Cache entries and the persisted blob format

use crate::clock;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// An in-memory cache entry with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,

    /// The cached value
    pub value: Value,

    /// Epoch milliseconds after which the entry is gone, `None` = forever
    pub expiry: Option<i64>,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` after `now_millis`
    pub fn new(key: impl Into<String>, value: Value, now_millis: i64, ttl: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            value,
            expiry: clock::expiry_from_ttl(now_millis, ttl),
        }
    }

    /// Rebuild an entry from a persisted blob
    pub fn from_blob(key: impl Into<String>, blob: StoredBlob) -> Self {
        Self {
            key: key.into(),
            value: blob.value,
            expiry: blob.expiry,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self, now_millis: i64) -> bool {
        clock::is_expired(self.expiry, now_millis)
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self, now_millis: i64) -> Option<Duration> {
        clock::time_to_live(self.expiry, now_millis)
    }

    /// Blob written to the durable store
    pub fn to_blob(&self) -> StoredBlob {
        StoredBlob {
            value: self.value.clone(),
            expiry: self.expiry,
        }
    }
}

/// Durable representation: `{"value": <any>, "expiry": <epoch-ms|null>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub value: Value,
    pub expiry: Option<i64>,
}

impl StoredBlob {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
