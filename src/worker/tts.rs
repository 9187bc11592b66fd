use crate::config::{Config, ElevenLabsConfig};
use crate::database::{DialogueSegment, Speaker};
use crate::elevenlabs::{SynthesisRequest, VoiceSynthesizer, MAX_PREVIOUS_REQUEST_IDS};
use crate::error::PipelineError;
use crate::storage::{segment_file_name, EpisodeLayout};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{with_retry, RetryPolicy};

/// Progress reported after each synthesized segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtsProgress {
    pub current: usize,
    pub total: usize,
}

/// Rolling continuity tokens, one bounded queue per speaker.
///
/// Scoped to a single pipeline run.
#[derive(Debug, Default)]
pub struct ContinuityHistory {
    by_speaker: HashMap<Speaker, VecDeque<String>>,
}

impl ContinuityHistory {
    pub fn recent(&self, speaker: Speaker) -> Vec<String> {
        self.by_speaker
            .get(&speaker)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn push(&mut self, speaker: Speaker, request_id: String) {
        let ids = self.by_speaker.entry(speaker).or_default();
        ids.push_back(request_id);
        while ids.len() > MAX_PREVIOUS_REQUEST_IDS {
            ids.pop_front();
        }
    }
}

/// Synthesizes a dialogue script into one audio file per segment.
pub struct SpeechSynthesizer {
    synthesizer: Arc<dyn VoiceSynthesizer>,
    voices: ElevenLabsConfig,
    layout: EpisodeLayout,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl SpeechSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn VoiceSynthesizer>,
        voices: ElevenLabsConfig,
        layout: EpisodeLayout,
        retry: RetryPolicy,
        request_delay: Duration,
    ) -> Self {
        Self {
            synthesizer,
            voices,
            layout,
            retry,
            request_delay,
        }
    }

    pub fn from_config(synthesizer: Arc<dyn VoiceSynthesizer>, config: &Config) -> Self {
        Self::new(
            synthesizer,
            config.elevenlabs.clone(),
            EpisodeLayout::new(&config.data_dir),
            config.retry.into(),
            config.tts_delay(),
        )
    }

    fn voice_id(&self, speaker: Speaker) -> Result<String, PipelineError> {
        match self.voices.voice_for(speaker) {
            (Some(id), _) => Ok(id.to_string()),
            (None, env_key) => Err(PipelineError::Config(format!(
                "Missing environment variable: {}",
                env_key
            ))),
        }
    }

    /// Synthesize every segment in order, writing `NNN-<speaker>.mp3` files
    /// into the episode's segment directory.
    ///
    /// Calls run one at a time so each speaker's continuity tokens stay in
    /// script order. `on_progress` runs after every segment; an error from it
    /// aborts the run. Files already written are left in place on failure.
    pub async fn generate_all_audio<F>(
        &self,
        segments: &[DialogueSegment],
        episode_id: &str,
        mut on_progress: F,
    ) -> Result<Vec<PathBuf>, PipelineError>
    where
        F: FnMut(TtsProgress) -> Result<(), PipelineError>,
    {
        let out_dir = self.layout.segments_dir(episode_id);
        tokio::fs::create_dir_all(&out_dir).await?;

        let total = segments.len();
        let mut history = ContinuityHistory::default();
        let mut written = Vec::with_capacity(total);

        for (i, segment) in segments.iter().enumerate() {
            let speaker = segment.speaker;
            let request = SynthesisRequest {
                text: segment.text.clone(),
                voice_id: self.voice_id(speaker)?,
                model_id: self.voices.model.clone(),
                output_format: self.voices.output_format.clone(),
                settings: self.voices.settings_for(speaker),
                previous_request_ids: history.recent(speaker),
            };

            let result = with_retry(self.retry, || self.synthesizer.synthesize(&request)).await?;

            let file_path = out_dir.join(segment_file_name(i, total, speaker.tag()));
            tokio::fs::write(&file_path, &result.audio).await?;
            log::debug!(
                "Wrote segment {}/{} ({} bytes) to {:?}",
                i + 1,
                total,
                result.audio.len(),
                file_path
            );
            written.push(file_path);

            if let Some(request_id) = result.request_id {
                history.push(speaker, request_id);
            }

            on_progress(TtsProgress {
                current: i + 1,
                total,
            })?;

            if i + 1 < total && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        Ok(written)
    }
}
