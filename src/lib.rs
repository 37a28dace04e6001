//! Image Generation Gateway
//!
//! Turns text prompts into images through a remote, rate-limited synthesis
//! provider. Provider calls are throttled by a wave scheduler, results are
//! kept in a content-addressed cache, and prompts are normalized first to
//! raise the hit rate.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod prompt;
pub mod queue;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::traits::ImageSynthesizer;
use cache::{CachedBlobStore, FileBlobStore, ImageCache, MemoryBlobStore};
use gateway::Generator;
use queue::{Scheduler, SchedulerConfig};

/// Application state built from settings
pub struct AppState {
    pub settings: config::Settings,
    pub generator: Arc<Generator>,
}

impl AppState {
    /// Build the generator around `synthesizer`, caching into `store` when
    /// caching is enabled. Without an explicit store, `cache.directory`
    /// selects a [`FileBlobStore`], otherwise an in-memory one is used.
    pub fn new(
        settings: config::Settings,
        synthesizer: Arc<dyn ImageSynthesizer>,
        store: Option<Arc<dyn CachedBlobStore>>,
    ) -> Result<Self> {
        settings.validate()?;

        let scheduler = Scheduler::new(SchedulerConfig::from(&settings.scheduler))?;

        let cache = settings.cache.enabled.then(|| {
            let store: Arc<dyn CachedBlobStore> = match (store, &settings.cache.directory) {
                (Some(store), _) => store,
                (None, Some(directory)) => Arc::new(FileBlobStore::new(directory)),
                (None, None) => Arc::new(MemoryBlobStore::new()),
            };
            ImageCache::with_ttl(store, settings.cache.ttl())
        });

        let generator = Generator::new(synthesizer, cache, scheduler)
            .with_max_batch(settings.batch.max_prompts);

        Ok(Self {
            settings,
            generator: Arc::new(generator),
        })
    }
}
