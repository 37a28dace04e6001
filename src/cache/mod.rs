//! Content-addressed image cache
//!
//! Keys are derived from the normalized prompt and every generation setting
//! that affects the output. Reads and writes pass straight through to a
//! [`CachedBlobStore`]; store failures are logged and degrade to a miss or
//! a skipped write, never to a failed request.

pub mod store;

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::GenerationSettings;

pub use store::{CachedBlobStore, FileBlobStore, MemoryBlobStore};

/// Default entry lifetime: 7 days
pub const DEFAULT_TTL: Duration = Duration::from_secs(604_800);

const KEY_PREFIX: &str = "img_";

/// Stable cache key, `img_` followed by 16 hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the key for a normalized prompt and its settings.
///
/// SHA-256 over a fixed-order binary encoding: length-prefixed prompt,
/// width, height, steps, guidance bits, then a presence byte and the seed.
pub fn compute_key(normalized_prompt: &str, settings: &GenerationSettings) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update((normalized_prompt.len() as u64).to_le_bytes());
    hasher.update(normalized_prompt.as_bytes());
    hasher.update(settings.width.to_le_bytes());
    hasher.update(settings.height.to_le_bytes());
    hasher.update(settings.num_steps.to_le_bytes());
    hasher.update(settings.guidance.to_bits().to_le_bytes());
    match settings.seed {
        Some(seed) => {
            hasher.update([1u8]);
            hasher.update(seed.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }

    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    CacheKey(format!("{}{:016x}", KEY_PREFIX, u64::from_be_bytes(head)))
}

/// Pass-through adapter over a blob store with local error containment
#[derive(Clone)]
pub struct ImageCache {
    store: Arc<dyn CachedBlobStore>,
    ttl: Duration,
}

impl ImageCache {
    pub fn new(store: Arc<dyn CachedBlobStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn CachedBlobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached bytes for `key`. Store errors read as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => {
                debug!(key = %key, size = bytes.len(), "Cache hit");
                Some(bytes)
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read error");
                None
            }
        }
    }

    /// Store with the adapter's default TTL
    pub async fn store(&self, key: &CacheKey, bytes: Vec<u8>) {
        self.store_with_ttl(key, bytes, self.ttl).await
    }

    /// Store errors are logged and otherwise ignored
    pub async fn store_with_ttl(&self, key: &CacheKey, bytes: Vec<u8>, ttl: Duration) {
        let size = bytes.len();
        match self.store.put(key.as_str(), bytes, ttl).await {
            Ok(()) => debug!(key = %key, size = size, ttl_secs = ttl.as_secs(), "Cached image"),
            Err(e) => warn!(key = %key, error = %e, "Cache write error"),
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        self.lookup(key).await.is_some()
    }
}
