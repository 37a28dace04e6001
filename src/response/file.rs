//! Writes generated images to disk

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

/// Handler for file storage operations
pub struct FileHandler {
    storage_path: PathBuf,
}

impl FileHandler {
    /// Create a new file handler
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Save image bytes under a fresh UUID name. The extension follows the
    /// detected format, falling back to `png`.
    pub async fn save(&self, data: &[u8]) -> Result<PathBuf> {
        let format = detect_image_format(data).unwrap_or("png");
        self.save_as(data, &format!("{}.{}", Uuid::new_v4(), format))
            .await
    }

    /// Save image bytes under an explicit file name
    pub async fn save_as(&self, data: &[u8], filename: &str) -> Result<PathBuf> {
        self.ensure_storage_dir().await?;

        let file_path = self.storage_path.join(filename);
        fs::write(&file_path, data).await?;

        debug!(path = ?file_path, size = data.len(), "Saved image file");
        Ok(file_path)
    }
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    None
}
