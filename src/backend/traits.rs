//! Common traits and types for image synthesis providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
pub const DEFAULT_NUM_STEPS: u32 = 4;
pub const DEFAULT_GUIDANCE: f32 = 3.5;

/// Every generation parameter that changes the synthesized output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub width: u32,
    pub height: u32,
    pub num_steps: u32,
    pub guidance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_steps: DEFAULT_NUM_STEPS,
            guidance: DEFAULT_GUIDANCE,
            seed: None,
        }
    }
}

/// A single prompt submitted for synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The prompt to generate an image from
    pub prompt: String,

    #[serde(flatten)]
    pub settings: GenerationSettings,

    /// Position inside a batch, preserved for client-side ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl GenerationRequest {
    /// Create a request with default settings.
    ///
    /// Fails with [`AppError::Validation`] when the prompt is empty after
    /// trimming.
    pub fn new(prompt: impl Into<String>) -> Result<Self> {
        Self::with_settings(prompt, GenerationSettings::default())
    }

    pub fn with_settings(prompt: impl Into<String>, settings: GenerationSettings) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt is required".to_string()));
        }
        Ok(Self {
            prompt,
            settings,
            index: None,
        })
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Trait for remote image synthesis providers
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Synthesize one image and return its encoded bytes
    async fn run(&self, prompt: &str, settings: &GenerationSettings) -> Result<Vec<u8>>;
}
