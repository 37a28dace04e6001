//! Request orchestration: normalize, look up, schedule, store
//!
//! Single and batch generation share one cache policy. Every prompt goes
//! through the same preparation (preset, optimization, key derivation) and
//! only cache misses are handed to the scheduler.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::backend::traits::{
    GenerationRequest, GenerationSettings, ImageSynthesizer, DEFAULT_GUIDANCE, DEFAULT_HEIGHT,
    DEFAULT_NUM_STEPS, DEFAULT_WIDTH,
};
use crate::cache::{compute_key, CacheKey, ImageCache};
use crate::error::{AppError, Result};
use crate::prompt::{apply_style_preset, optimize};
use crate::queue::{Scheduler, TaskHandle};
use crate::response::{base64, detect_image_format};

/// Default upper bound on prompts per batch
pub const DEFAULT_MAX_BATCH: usize = 10;

fn default_true() -> bool {
    true
}

/// Caller-supplied generation parameters; missing fields take defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, alias = "numSteps")]
    pub num_steps: Option<u32>,
    #[serde(default)]
    pub guidance: Option<f32>,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl GenerationOverrides {
    pub fn resolve(&self) -> GenerationSettings {
        GenerationSettings {
            width: self.width.unwrap_or(DEFAULT_WIDTH),
            height: self.height.unwrap_or(DEFAULT_HEIGHT),
            num_steps: self.num_steps.unwrap_or(DEFAULT_NUM_STEPS),
            guidance: self.guidance.unwrap_or(DEFAULT_GUIDANCE),
            seed: self.seed,
        }
    }
}

/// Single generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub prompt: String,
    #[serde(flatten)]
    pub settings: GenerationOverrides,
    #[serde(default = "default_true")]
    pub optimize: bool,
    #[serde(default = "default_true", alias = "useCache")]
    pub use_cache: bool,
    /// Style preset applied before optimization; its parameters win
    #[serde(default)]
    pub preset: Option<String>,
}

impl GenerateOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            settings: GenerationOverrides::default(),
            optimize: true,
            use_cache: true,
            preset: None,
        }
    }
}

/// Batch generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub settings: GenerationOverrides,
    #[serde(default)]
    pub optimize: bool,
    #[serde(default = "default_true", alias = "useCache")]
    pub use_cache: bool,
}

impl BatchOptions {
    pub fn new<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompts: prompts.into_iter().map(Into::into).collect(),
            settings: GenerationOverrides::default(),
            optimize: false,
            use_cache: true,
        }
    }
}

/// How a result was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Caching disabled for this request or for the generator
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// A generated (or cached) image with its metadata
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub image: Vec<u8>,
    /// Prompt actually sent to the provider
    pub prompt: String,
    pub settings: GenerationSettings,
    pub optimized: bool,
    pub cache: CacheStatus,
    pub cache_key: CacheKey,
    pub elapsed: Duration,
}

impl GenerationOutcome {
    /// Image as a `data:` URL, typed by its magic bytes (PNG when unknown)
    pub fn data_url(&self) -> String {
        let format = detect_image_format(&self.image).unwrap_or("png");
        base64::create_data_url(&self.image, format)
    }
}

/// Failure of one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: &'static str,
    pub message: String,
}

impl From<AppError> for ItemFailure {
    fn from(error: AppError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one prompt inside a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Position of the prompt in the submitted list
    pub index: usize,
    /// Prompt as submitted
    pub prompt: String,
    pub result: std::result::Result<GenerationOutcome, ItemFailure>,
}

/// Aggregate batch result. Partial failure is a normal outcome.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Sorted by `index`
    pub items: Vec<BatchItem>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn successes(&self) -> impl Iterator<Item = (usize, &GenerationOutcome)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().ok().map(|outcome| (item.index, outcome)))
    }
}

/// Prompt after preset and optimization, with its cache key
struct PreparedRequest {
    request: GenerationRequest,
    key: CacheKey,
    optimized: bool,
}

/// Wires the normalizer, cache and scheduler around a synthesizer
pub struct Generator {
    synthesizer: Arc<dyn ImageSynthesizer>,
    cache: Option<ImageCache>,
    scheduler: Scheduler,
    max_batch: usize,
}

impl Generator {
    pub fn new(
        synthesizer: Arc<dyn ImageSynthesizer>,
        cache: Option<ImageCache>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            synthesizer,
            cache,
            scheduler,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// Set the maximum number of prompts accepted per batch (at least one)
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn prepare(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
        optimize_prompt: bool,
        preset: Option<&str>,
    ) -> Result<PreparedRequest> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("Prompt is required".to_string()));
        }

        let (mut text, settings) = match preset {
            Some(key) => {
                let applied = apply_style_preset(trimmed, key)?;
                let settings = applied.settings(overrides.seed);
                (applied.prompt, settings)
            }
            None => (trimmed.to_string(), overrides.resolve()),
        };

        if optimize_prompt {
            text = optimize(&text).optimized;
        }

        let key = compute_key(&text, &settings);
        let request = GenerationRequest::with_settings(text, settings)?;

        Ok(PreparedRequest {
            request,
            key,
            optimized: optimize_prompt,
        })
    }

    fn schedule(&self, request: GenerationRequest) -> TaskHandle<Vec<u8>> {
        let synthesizer = self.synthesizer.clone();
        let prompt = request.prompt.clone();
        let settings = request.settings;

        self.scheduler.submit_request(request, move || async move {
            synthesizer.run(&prompt, &settings).await
        })
    }

    fn cache_for(&self, use_cache: bool) -> Option<&ImageCache> {
        self.cache.as_ref().filter(|_| use_cache)
    }

    /// Generate one image, serving it from the cache when possible
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerationOutcome> {
        let started = Instant::now();
        let prepared = self.prepare(
            &options.prompt,
            &options.settings,
            options.optimize,
            options.preset.as_deref(),
        )?;
        let cache = self.cache_for(options.use_cache);

        if let Some(cache) = cache {
            if let Some(image) = cache.lookup(&prepared.key).await {
                let outcome = finish(prepared, image, CacheStatus::Hit, started);
                info!(
                    key = %outcome.cache_key,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Served from cache"
                );
                return Ok(outcome);
            }
        }

        let image = self.schedule(prepared.request.clone()).await?;

        let status = match cache {
            Some(cache) => {
                cache.store(&prepared.key, image.clone()).await;
                CacheStatus::Miss
            }
            None => CacheStatus::Bypass,
        };

        let outcome = finish(prepared, image, status, started);
        info!(
            key = %outcome.cache_key,
            cache = outcome.cache.as_str(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Generated image"
        );
        Ok(outcome)
    }

    /// Generate a batch. Prompts beyond the batch cap are dropped; every
    /// remaining prompt yields one item, successful or not.
    pub async fn generate_batch(&self, options: BatchOptions) -> Result<BatchReport> {
        let started = Instant::now();

        if options.prompts.is_empty() {
            return Err(AppError::Validation(
                "At least one prompt is required".to_string(),
            ));
        }

        if options.prompts.len() > self.max_batch {
            warn!(
                submitted = options.prompts.len(),
                max_batch = self.max_batch,
                "Batch truncated"
            );
        }

        let prompts: Vec<String> = options.prompts.into_iter().take(self.max_batch).collect();
        let total = prompts.len();
        let cache = self.cache_for(options.use_cache);

        let prepared: Vec<_> = prompts
            .iter()
            .enumerate()
            .map(|(index, prompt)| {
                self.prepare(prompt, &options.settings, options.optimize, None)
                    .map(|p| PreparedRequest {
                        request: p.request.at_index(index),
                        ..p
                    })
            })
            .collect();

        // Lookups run together; misses are then submitted in index order so
        // the scheduler sees the batch FIFO.
        let lookups = join_all(prepared.iter().map(|p| async move {
            match (p, cache) {
                (Ok(p), Some(cache)) => cache.lookup(&p.key).await,
                _ => None,
            }
        }))
        .await;

        enum Pending {
            Done(std::result::Result<GenerationOutcome, ItemFailure>),
            Scheduled(PreparedRequest, TaskHandle<Vec<u8>>),
        }

        let pending: Vec<Pending> = prepared
            .into_iter()
            .zip(lookups)
            .map(|(prepared, cached)| match (prepared, cached) {
                (Err(e), _) => Pending::Done(Err(e.into())),
                (Ok(p), Some(image)) => {
                    Pending::Done(Ok(finish(p, image, CacheStatus::Hit, started)))
                }
                (Ok(p), None) => {
                    let handle = self.schedule(p.request.clone());
                    Pending::Scheduled(p, handle)
                }
            })
            .collect();

        let results = join_all(pending.into_iter().map(|entry| async move {
            match entry {
                Pending::Done(result) => result,
                Pending::Scheduled(p, handle) => match handle.await {
                    Ok(image) => {
                        let status = match cache {
                            Some(cache) => {
                                cache.store(&p.key, image.clone()).await;
                                CacheStatus::Miss
                            }
                            None => CacheStatus::Bypass,
                        };
                        Ok(finish(p, image, status, started))
                    }
                    Err(e) => {
                        warn!(index = ?p.request.index, error = %e, "Batch item failed");
                        Err(ItemFailure::from(e))
                    }
                },
            }
        }))
        .await;

        let items: Vec<BatchItem> = prompts
            .into_iter()
            .zip(results)
            .enumerate()
            .map(|(index, (prompt, result))| BatchItem {
                index,
                prompt,
                result,
            })
            .collect();

        let successful = items.iter().filter(|item| item.result.is_ok()).count();
        let report = BatchReport {
            total,
            successful,
            failed: total - successful,
            items,
            elapsed: started.elapsed(),
        };

        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch completed"
        );

        Ok(report)
    }
}

fn finish(
    prepared: PreparedRequest,
    image: Vec<u8>,
    cache: CacheStatus,
    started: Instant,
) -> GenerationOutcome {
    GenerationOutcome {
        image,
        prompt: prepared.request.prompt,
        settings: prepared.request.settings,
        optimized: prepared.optimized,
        cache,
        cache_key: prepared.key,
        elapsed: started.elapsed(),
    }
}
