//! Common error types for the image generation gateway

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Rejected before touching the scheduler or the cache
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The synthesis provider failed for this task only
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Store-level failure. The cache adapter absorbs these; they only
    /// escape from a raw [`CachedBlobStore`](crate::cache::CachedBlobStore).
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Unknown style preset: {0}")]
    UnknownPreset(String),

    #[error("Task cancelled before it started")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure is transient on the provider side.
    ///
    /// Nothing in the crate retries automatically; callers may use this to
    /// decide whether resubmitting is worth the cost.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Short machine-readable kind, used in batch item reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Json(_) => "json_error",
            AppError::HttpClient(_) => "upstream_error",
            AppError::Validation(_) => "validation_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::Cache(_) => "cache_error",
            AppError::UnknownPreset(_) => "unknown_preset",
            AppError::Cancelled => "cancelled",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
