//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Wave scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_inter_wave_delay")]
    pub inter_wave_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_inter_wave_delay() -> u64 {
    1000
}

impl SchedulerSettings {
    pub fn inter_wave_delay(&self) -> Duration {
        Duration::from_millis(self.inter_wave_delay_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            inter_wave_delay_ms: default_inter_wave_delay(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Keep entries as files under this directory. In-memory when unset.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    // 7 days
    604_800
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl(),
            directory: None,
        }
    }
}

/// Remote synthesis provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesizerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_endpoint() -> String {
    "http://localhost:8787".to_string()
}

fn default_model() -> String {
    "@cf/black-forest-labs/flux-2-dev".to_string()
}

fn default_timeout() -> u64 {
    60000
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_token: None,
            timeout_ms: default_timeout(),
        }
    }
}

/// Batch generation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    #[serde(default = "default_max_prompts")]
    pub max_prompts: usize,
}

fn default_max_prompts() -> usize {
    10
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_prompts: default_max_prompts(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: String,
}

fn default_output_dir() -> String {
    "./generated_images".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("scheduler.max_concurrent", 3)?
            .set_default("scheduler.inter_wave_delay_ms", 1000)?
            .set_default("cache.enabled", true)?
            .set_default("cache.ttl_secs", 604_800)?
            .set_default("batch.max_prompts", 10)?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMAGEGEN_)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(invalid("scheduler.max_concurrent must be at least 1"));
        }

        if self.synthesizer.endpoint.trim().is_empty() {
            return Err(invalid("synthesizer.endpoint cannot be empty"));
        }

        if self.batch.max_prompts == 0 {
            return Err(invalid("batch.max_prompts must be at least 1"));
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(invalid(&format!(
                "logging.format '{}' is invalid. Must be 'json' or 'pretty'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            cache: CacheSettings::default(),
            synthesizer: SynthesizerConfig::default(),
            batch: BatchSettings::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
