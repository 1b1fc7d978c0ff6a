// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent configuration cache.
//!
//! The cache is an opaque byte-blob store supplied by the caller; the
//! coordinator writes the raw JSON body through on every configuration
//! change and falls back to it when the network is unavailable. Cache
//! errors are logged by the coordinator, never surfaced.

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::RwLock;

/// Error type cache implementations report.
pub type CacheError = Box<dyn std::error::Error + Send + Sync>;

/// A concurrent byte-blob store keyed by string.
#[async_trait]
pub trait ConfigCache: Send + Sync {
    /// Read the blob stored under `key`; empty when never written.
    async fn read(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Store `value` under `key`.
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
}

/// Cache key for an SDK key.
///
/// Derived as a deterministic hash so multiple clients configured with
/// the same SDK key share one slot.
#[must_use]
pub fn cache_key_for(sdk_key: &str) -> String {
    format!("rust_config_v5_{}", hex::encode(Sha1::digest(sdk_key.as_bytes())))
}

/// In-memory [`ConfigCache`] for tests and single-process reuse.
#[derive(Debug, Default)]
pub struct InMemoryConfigCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryConfigCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigCache for InMemoryConfigCache {
    async fn read(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        Ok(self
            .entries
            .read()
            .expect("cache lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
