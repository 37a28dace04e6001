//! Main entry point for the image generation gateway CLI

use clap::{Args, Parser, Subcommand};
use imagegen_gateway::{
    backend::HttpSynthesizer,
    config::{LoggingConfig, Settings},
    gateway::{BatchOptions, GenerateOptions, GenerationOverrides},
    prompt,
    response::FileHandler,
    AppState,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "imagegen", version, about = "Generate images from text prompts")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "IMAGEGEN_CONFIG", default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a single image
    ///
    /// Results are cached under `cache.directory` so repeated prompts are
    /// served without calling the provider. Without that setting the cache
    /// lives in memory and only helps within one invocation.
    Generate {
        prompt: String,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Style preset applied before optimization
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        no_optimize: bool,
        #[arg(long)]
        no_cache: bool,
        /// Also print the image as a base64 data URL
        #[arg(long)]
        data_url: bool,
    },
    /// Generate one image per prompt, throttled in waves
    Batch {
        prompts: Vec<String>,
        /// Read prompts from a file, one per line
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        settings: SettingsArgs,
        #[arg(long)]
        optimize: bool,
    },
    /// List the available style presets
    Presets,
    /// Show the optimized form of a prompt
    Optimize { prompt: String },
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    guidance: Option<f32>,
    #[arg(long)]
    seed: Option<i64>,
}

impl From<SettingsArgs> for GenerationOverrides {
    fn from(args: SettingsArgs) -> Self {
        Self {
            width: args.width,
            height: args.height,
            num_steps: args.steps,
            guidance: args.guidance,
            seed: args.seed,
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "pretty" {
        registry.with(fmt::layer().pretty().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::load_from_path(&cli.config)?;
    init_logging(&settings.logging);

    match &cli.command {
        Command::Presets => {
            let listing = serde_json::to_string_pretty(prompt::presets())?;
            println!("{listing}");
            return Ok(());
        }
        Command::Optimize { prompt: raw } => {
            let optimization = prompt::optimize(raw);
            println!("{}", serde_json::to_string_pretty(&optimization)?);
            return Ok(());
        }
        _ => {}
    }

    info!(
        endpoint = %settings.synthesizer.endpoint,
        model = %settings.synthesizer.model,
        max_concurrent = settings.scheduler.max_concurrent,
        "Starting image generation"
    );

    let synthesizer = Arc::new(HttpSynthesizer::new(&settings.synthesizer)?);
    let files = FileHandler::new(&settings.output.directory);
    let state = AppState::new(settings, synthesizer, None)?;

    match cli.command {
        Command::Generate {
            prompt,
            settings,
            preset,
            no_optimize,
            no_cache,
            data_url,
        } => {
            let outcome = state
                .generator
                .generate(GenerateOptions {
                    prompt,
                    settings: settings.into(),
                    optimize: !no_optimize,
                    use_cache: !no_cache,
                    preset,
                })
                .await?;

            let path = files.save(&outcome.image).await?;
            let mut summary = json!({
                "file": path,
                "prompt": outcome.prompt,
                "cache": outcome.cache,
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
            });
            if data_url {
                summary["data_url"] = json!(outcome.data_url());
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Batch {
            mut prompts,
            file,
            settings,
            optimize,
        } => {
            if let Some(file) = file {
                let contents = tokio::fs::read_to_string(&file).await?;
                prompts.extend(
                    contents
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(String::from),
                );
            }

            let mut options = BatchOptions::new(prompts);
            options.settings = settings.into();
            options.optimize = optimize;

            let report = state.generator.generate_batch(options).await?;

            let mut results = Vec::with_capacity(report.items.len());
            for item in &report.items {
                match &item.result {
                    Ok(outcome) => {
                        let path = files.save(&outcome.image).await?;
                        results.push(json!({
                            "index": item.index,
                            "prompt": item.prompt,
                            "file": path,
                            "cache": outcome.cache,
                        }));
                    }
                    Err(failure) => results.push(json!({
                        "index": item.index,
                        "prompt": item.prompt,
                        "error": failure,
                    })),
                }
            }

            let summary = json!({
                "total": report.total,
                "successful": report.successful,
                "failed": report.failed,
                "elapsed_ms": report.elapsed.as_millis() as u64,
                "results": results,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Presets | Command::Optimize { .. } => {}
    }

    Ok(())
}
