//! Functional tests for single and batch generation

use async_trait::async_trait;
use imagegen_gateway::backend::{GenerationSettings, ImageSynthesizer};
use imagegen_gateway::cache::{ImageCache, MemoryBlobStore};
use imagegen_gateway::config::Settings;
use imagegen_gateway::gateway::{
    BatchOptions, CacheStatus, GenerateOptions, GenerationOverrides, Generator,
};
use imagegen_gateway::queue::{Scheduler, SchedulerConfig};
use imagegen_gateway::{AppError, AppState, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echoes the prompt back as image bytes; prompts containing "FAIL" error
#[derive(Default)]
struct FakeSynthesizer {
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, GenerationSettings)>>,
}

#[async_trait]
impl ImageSynthesizer for FakeSynthesizer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(&self, prompt: &str, settings: &GenerationSettings) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((prompt.to_string(), *settings));
        if prompt.contains("FAIL") {
            return Err(AppError::Upstream("provider rejected prompt".to_string()));
        }
        Ok(prompt.as_bytes().to_vec())
    }
}

fn generator(synthesizer: Arc<FakeSynthesizer>, cached: bool) -> Generator {
    let scheduler = Scheduler::new(SchedulerConfig {
        max_concurrent: 3,
        inter_wave_delay: Duration::from_millis(100),
    })
    .unwrap();
    let cache = cached.then(|| ImageCache::new(Arc::new(MemoryBlobStore::new())));
    Generator::new(synthesizer, cache, scheduler)
}

#[tokio::test(start_paused = true)]
async fn test_second_identical_request_hits_cache() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let first = generator
        .generate(GenerateOptions::new("a portrait of a cat"))
        .await
        .unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert!(first.optimized);

    let second = generator
        .generate(GenerateOptions::new("  a portrait of a cat "))
        .await
        .unwrap();
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(second.image, first.image);
    assert_eq!(second.cache_key, first.cache_key);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_optimized_prompt_reaches_provider() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let outcome = generator
        .generate(GenerateOptions::new("a portrait of a cat"))
        .await
        .unwrap();

    let seen = synthesizer.seen.lock();
    assert_eq!(seen[0].0, outcome.prompt);
    assert!(outcome.prompt.contains("shallow depth of field"));
    assert!(outcome.prompt.ends_with("high quality, detailed, 8k resolution"));
}

#[tokio::test(start_paused = true)]
async fn test_different_settings_do_not_share_cache() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let mut options = GenerateOptions::new("a red fox");
    generator.generate(options.clone()).await.unwrap();

    options.settings = GenerationOverrides {
        seed: Some(7),
        ..Default::default()
    };
    let seeded = generator.generate(options).await.unwrap();

    assert_eq!(seeded.cache, CacheStatus::Miss);
    assert_eq!(seeded.settings.seed, Some(7));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_use_cache_false_bypasses() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let mut options = GenerateOptions::new("a red fox");
    options.use_cache = false;

    let first = generator.generate(options.clone()).await.unwrap();
    let second = generator.generate(options).await.unwrap();

    assert_eq!(first.cache, CacheStatus::Bypass);
    assert_eq!(second.cache, CacheStatus::Bypass);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_prompt_is_rejected_before_scheduling() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let result = generator.generate(GenerateOptions::new("   ")).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.scheduler().stats().waves_completed, 0);
}

#[tokio::test]
async fn test_unknown_preset_fails_fast() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let mut options = GenerateOptions::new("a cat");
    options.preset = Some("watercolor".to_string());

    assert!(matches!(
        generator.generate(options).await,
        Err(AppError::UnknownPreset(_))
    ));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_preset_parameters_override_caller() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), false);

    let mut options = GenerateOptions::new("a mountain lake");
    options.preset = Some("landscape".to_string());
    options.optimize = false;
    options.settings = GenerationOverrides {
        width: Some(512),
        seed: Some(3),
        ..Default::default()
    };

    let outcome = generator.generate(options).await.unwrap();

    assert_eq!(outcome.settings.width, 1024);
    assert_eq!(outcome.settings.height, 768);
    assert_eq!(outcome.settings.num_steps, 5);
    assert_eq!(outcome.settings.seed, Some(3));
    assert!(outcome.prompt.starts_with("a mountain lake, landscape photography"));
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failure_reaches_caller() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let result = generator.generate(GenerateOptions::new("FAIL this")).await;
    assert!(matches!(result, Err(AppError::Upstream(_))));

    // Failures are not cached
    let retry = generator.generate(GenerateOptions::new("FAIL this")).await;
    assert!(retry.is_err());
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_reports_partial_failure_in_index_order() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let report = generator
        .generate_batch(BatchOptions::new([
            "a red fox",
            "FAIL one",
            "",
            "a blue whale",
            "a green frog",
        ]))
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.successful, 3);
    assert_eq!(report.failed, 2);

    let indices: Vec<_> = report.items.iter().map(|item| item.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    let upstream = report.items[1].result.as_ref().unwrap_err();
    assert_eq!(upstream.kind, "upstream_error");
    let validation = report.items[2].result.as_ref().unwrap_err();
    assert_eq!(validation.kind, "validation_error");

    let whale = report.items[3].result.as_ref().unwrap();
    assert_eq!(whale.image, b"a blue whale".to_vec());

    // The empty prompt never reached the provider
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_batch_uses_cache_from_single_generation() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), true);

    let mut single = GenerateOptions::new("a red fox");
    single.optimize = false;
    generator.generate(single).await.unwrap();

    let report = generator
        .generate_batch(BatchOptions::new(["a red fox", "a blue whale"]))
        .await
        .unwrap();

    let statuses: Vec<_> = report
        .successes()
        .map(|(_, outcome)| outcome.cache)
        .collect();
    assert_eq!(statuses, vec![CacheStatus::Hit, CacheStatus::Miss]);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_is_capped_and_throttled() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer.clone(), false);
    let started = tokio::time::Instant::now();

    let prompts: Vec<String> = (0..12).map(|i| format!("prompt number {i}")).collect();
    let report = generator
        .generate_batch(BatchOptions::new(prompts))
        .await
        .unwrap();

    assert_eq!(report.total, 10);
    assert_eq!(report.successful, 10);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 10);
    // ceil(10 / 3) = 4 waves, three delays of 100ms
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer, true);

    let result = generator
        .generate_batch(BatchOptions::new(Vec::<String>::new()))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn test_app_state_from_settings() {
    let mut settings = Settings::default();
    settings.batch.max_prompts = 2;
    settings.scheduler.inter_wave_delay_ms = 0;

    let synthesizer = Arc::new(FakeSynthesizer::default());
    let state = AppState::new(settings, synthesizer.clone(), None).unwrap();

    assert_eq!(state.generator.max_batch(), 2);
    assert_eq!(state.generator.scheduler().config().max_concurrent, 3);

    let outcome = state
        .generator
        .generate(GenerateOptions::new("a quiet harbor"))
        .await
        .unwrap();
    assert_eq!(outcome.cache, CacheStatus::Miss);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_renders_as_data_url() {
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let generator = generator(synthesizer, false);

    let mut options = GenerateOptions::new("hi");
    options.optimize = false;
    let outcome = generator.generate(options).await.unwrap();

    // "hi" has no image signature, so the URL falls back to PNG
    assert_eq!(outcome.data_url(), "data:image/png;base64,aGk=");
}

#[tokio::test]
async fn test_cache_directory_persists_across_app_states() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.scheduler.inter_wave_delay_ms = 0;
    settings.cache.directory = Some(dir.path().to_string_lossy().into_owned());

    let synthesizer = Arc::new(FakeSynthesizer::default());
    let first = AppState::new(settings.clone(), synthesizer.clone(), None).unwrap();
    let miss = first
        .generator
        .generate(GenerateOptions::new("a quiet harbor"))
        .await
        .unwrap();
    assert_eq!(miss.cache, CacheStatus::Miss);

    let second = AppState::new(settings, synthesizer.clone(), None).unwrap();
    let hit = second
        .generator
        .generate(GenerateOptions::new("a quiet harbor"))
        .await
        .unwrap();
    assert_eq!(hit.cache, CacheStatus::Hit);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
}
