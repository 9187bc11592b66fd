pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod elevenlabs;
pub mod error;
pub mod openai;
pub mod storage;
pub mod worker;

use anyhow::Context;
use config::Config;
use database::Database;
use elevenlabs::{ElevenLabsClient, VoiceSynthesizer};
use openai::{OpenAiClient, TextGenerator};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worker::concat::{AudioToolchain, FfmpegToolchain};
use worker::{Pipeline, PipelineRunner};

/// Shared state handed to every command.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub runner: PipelineRunner,
}

impl AppState {
    /// Build state backed by the real service clients and ffmpeg.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let generator = OpenAiClient::new(&config.openai.base_url, config.openai.api_key.clone())
            .with_model(&config.openai.model);
        let synthesizer = ElevenLabsClient::new(
            &config.elevenlabs.base_url,
            config.elevenlabs.api_key.clone(),
        );
        let toolchain = FfmpegToolchain::new(&config.tools);

        log::info!(
            "Text model: {}, voice model: {}",
            generator.model(),
            config.elevenlabs.model
        );

        Self::with_services(
            config,
            Arc::new(generator),
            Arc::new(synthesizer),
            Arc::new(toolchain),
        )
    }

    pub fn with_services(
        config: Config,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn VoiceSynthesizer>,
        toolchain: Arc<dyn AudioToolchain>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;

        let db_path = config.database_path();
        let db = Arc::new(
            Database::new(&db_path)
                .with_context(|| format!("Failed to open database: {}", db_path.display()))?,
        );

        if config.reconcile_on_startup {
            match db.fail_orphaned_episodes() {
                Ok(count) if count > 0 => {
                    log::info!("Startup cleanup: {} interrupted episodes marked as errored", count)
                }
                Ok(_) => {}
                Err(e) => log::warn!("Failed to reconcile interrupted episodes: {}", e),
            }
        }

        let pipeline = Pipeline::new(db.clone(), &config, generator, synthesizer, toolchain);
        let runner = PipelineRunner::new(Arc::new(pipeline));

        Ok(Self { config, db, runner })
    }
}

/// Install the global subscriber on stderr. `RUST_LOG` overrides the
/// default `info` level; `log` records are forwarded to it.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }
}
