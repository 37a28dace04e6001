//! Blob store abstraction backing the result cache

use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Durable key/value blob storage with per-entry expiry
#[async_trait]
pub trait CachedBlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl StoredBlob {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process blob store. Expired entries read as absent and are evicted
/// when touched.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, blob| blob.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired cache entries");
        }
        removed
    }
}

#[async_trait]
impl CachedBlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();

        if let Some(blob) = self.entries.get(key) {
            if blob.is_live(now) {
                return Ok(Some(blob.bytes.clone()));
            }
        } else {
            return Ok(None);
        }

        self.entries.remove_if(key, |_, blob| !blob.is_live(now));
        Ok(None)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }
}

/// Blob store keeping one file per key under a directory, so entries
/// outlive the process.
///
/// Each file starts with the expiry as big-endian milliseconds since the
/// Unix epoch (`u64::MAX` for never), followed by the blob bytes.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    directory: PathBuf,
}

const EXPIRY_HEADER_LEN: usize = 8;

impl FileBlobStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::Cache(format!("Invalid cache key: {key:?}")));
        }
        Ok(self.directory.join(format!("{key}.blob")))
    }
}

fn unix_millis_now() -> Result<u64> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Cache(format!("System clock before Unix epoch: {e}")))?;
    Ok(u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
}

#[async_trait]
impl CachedBlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;

        let mut contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if contents.len() < EXPIRY_HEADER_LEN {
            return Err(AppError::Cache(format!("Truncated cache entry {key}")));
        }

        let mut header = [0u8; EXPIRY_HEADER_LEN];
        header.copy_from_slice(&contents[..EXPIRY_HEADER_LEN]);
        let expires_at = u64::from_be_bytes(header);

        if expires_at <= unix_millis_now()? {
            // Another reader may have removed it already
            let _ = fs::remove_file(&path).await;
            debug!(key = key, "Evicted expired cache file");
            return Ok(None);
        }

        Ok(Some(contents.split_off(EXPIRY_HEADER_LEN)))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.directory).await?;

        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = unix_millis_now()?.saturating_add(ttl_millis);

        let mut contents = Vec::with_capacity(EXPIRY_HEADER_LEN + bytes.len());
        contents.extend_from_slice(&expires_at.to_be_bytes());
        contents.extend_from_slice(&bytes);

        // Write then rename so readers never see a partial entry
        let staging = self.directory.join(format!("{key}.{}.tmp", Uuid::new_v4()));
        fs::write(&staging, &contents).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}
