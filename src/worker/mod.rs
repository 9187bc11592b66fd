pub mod concat;
pub mod retry;
pub mod script;
pub mod summarize;
pub mod tts;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::Config;
use crate::database::{
    preview, Database, EpisodeMeta, EpisodePatch, EpisodeStatus, SourceDescriptor,
};
use crate::elevenlabs::VoiceSynthesizer;
use crate::error::PipelineError;
use crate::openai::TextGenerator;
use crate::storage::EpisodeLayout;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use concat::{concatenate_segments, AudioToolchain};
use retry::RetryPolicy;
use tts::{SpeechSynthesizer, TtsProgress};

/// Title shown until the summary stage picks a real one.
pub const PLACEHOLDER_TITLE: &str = "Processing...";

/// Error recorded when a pipeline task dies without reporting a result.
pub const PANIC_MESSAGE: &str = "Pipeline task terminated unexpectedly";

/// Drives one episode from source text to finished audio.
///
/// Each stage publishes its status to the database before it starts, so a
/// client polling the record always sees where the run is.
pub struct Pipeline {
    db: Arc<Database>,
    layout: EpisodeLayout,
    generator: Arc<dyn TextGenerator>,
    speech: SpeechSynthesizer,
    toolchain: Arc<dyn AudioToolchain>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        db: Arc<Database>,
        config: &Config,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn VoiceSynthesizer>,
        toolchain: Arc<dyn AudioToolchain>,
    ) -> Self {
        Self {
            db,
            layout: EpisodeLayout::new(&config.data_dir),
            generator,
            speech: SpeechSynthesizer::from_config(synthesizer, config),
            toolchain,
            retry: config.retry.into(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn layout(&self) -> &EpisodeLayout {
        &self.layout
    }

    /// Create the episode's directories and its initial `processing` record.
    pub fn initialize_episode(
        &self,
        id: &str,
        text: &str,
        source: &SourceDescriptor,
    ) -> Result<EpisodeMeta, PipelineError> {
        self.layout.create_episode_dirs(id)?;

        let meta = EpisodeMeta {
            id: id.to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: Utc::now(),
            status: EpisodeStatus::Processing,
            duration: None,
            segment_count: None,
            total_segments: None,
            current_segment: None,
            source_text_preview: preview(text),
            error: None,
            source_type: source.source_type(),
            source_newsletter_ids: source.newsletter_ids().map(|ids| ids.to_vec()),
        };
        self.db.write_episode(&meta)?;
        log::info!(
            "Initialized episode {} ({} chars, source: {})",
            id,
            text.chars().count(),
            meta.source_type.as_str()
        );
        Ok(meta)
    }

    /// Run every stage for an initialized episode.
    ///
    /// Never returns an error: any failure ends up as `status = error` with
    /// its message on the record, and newsletter sources stay unused.
    pub async fn run_pipeline(&self, id: &str, text: &str, newsletter_ids: &[String]) {
        let span = tracing::info_span!("pipeline", episode_id = %id);
        let result = self
            .run_stages(id, text, newsletter_ids)
            .instrument(span)
            .await;

        match result {
            Ok(meta) => log::info!(
                "Episode {} complete: \"{}\", {} segments, {:.1}s",
                id,
                meta.title,
                meta.segment_count.unwrap_or(0),
                meta.duration.unwrap_or(0.0)
            ),
            Err(e) => {
                log::error!("Pipeline failed for episode {}: {}", id, e);
                self.record_failure(id, &e.to_string());
            }
        }
    }

    async fn run_stages(
        &self,
        id: &str,
        text: &str,
        newsletter_ids: &[String],
    ) -> Result<EpisodeMeta, PipelineError> {
        self.set_status(id, EpisodePatch::status(EpisodeStatus::Summarizing))?;
        let summary = summarize::summarize_text(self.generator.as_ref(), self.retry, text).await?;
        log::info!(
            "Summarized episode {}: \"{}\" ({} key points)",
            id,
            summary.title,
            summary.key_points.len()
        );

        self.set_status(
            id,
            EpisodePatch {
                title: Some(summary.title.clone()),
                status: Some(EpisodeStatus::Scripting),
                ..Default::default()
            },
        )?;
        let script = script::generate_script(self.generator.as_ref(), self.retry, &summary).await?;
        self.db.write_script(id, &script)?;

        let total = script.segments.len() as i64;
        self.set_status(
            id,
            EpisodePatch {
                status: Some(EpisodeStatus::GeneratingAudio),
                total_segments: Some(total),
                current_segment: Some(0),
                ..Default::default()
            },
        )?;
        self.speech
            .generate_all_audio(&script.segments, id, |progress: TtsProgress| {
                self.set_status(
                    id,
                    EpisodePatch {
                        current_segment: Some(progress.current as i64),
                        ..Default::default()
                    },
                )
            })
            .await?;

        let duration = concatenate_segments(self.toolchain.as_ref(), &self.layout, id).await?;
        let meta = self
            .db
            .complete_episode(id, duration, total, newsletter_ids)?;
        Ok(meta)
    }

    fn set_status(&self, id: &str, patch: EpisodePatch) -> Result<(), PipelineError> {
        self.db.update_episode(id, &patch)?;
        Ok(())
    }

    /// Best-effort terminal `error` update. A record that is already
    /// terminal is left alone.
    fn record_failure(&self, id: &str, message: &str) {
        let patch = EpisodePatch {
            status: Some(EpisodeStatus::Error),
            error: Some(message.to_string()),
            ..Default::default()
        };
        if let Err(e) = self.db.update_episode(id, &patch) {
            log::error!("Failed to record error for episode {}: {}", id, e);
        }
    }

    /// Fail every episode left mid-pipeline by a previous process.
    pub fn reconcile_orphans(&self) -> Result<usize, PipelineError> {
        Ok(self.db.fail_orphaned_episodes()?)
    }
}

/// Runs pipelines in the background and keeps track of them.
///
/// Every run gets a supervisor task; if the run panics the supervisor
/// still moves the record to `error`.
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    tracker: TaskTracker,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            tracker: TaskTracker::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Start a run for an initialized episode and return immediately.
    pub fn spawn(&self, id: String, text: String, newsletter_ids: Vec<String>) {
        let pipeline = self.pipeline.clone();
        let run_id = id.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_pipeline(&run_id, &text, &newsletter_ids).await;
        });

        let pipeline = self.pipeline.clone();
        self.tracker.spawn(async move {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!("Pipeline task for episode {} panicked", id);
                    pipeline.record_failure(&id, PANIC_MESSAGE);
                } else {
                    log::warn!("Pipeline task for episode {} was cancelled", id);
                }
            }
        });
    }

    /// Number of runs still in flight.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every spawned run to finish. New runs may still be spawned
    /// afterwards.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
