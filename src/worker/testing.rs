//! In-process fakes for the external services a pipeline talks to.

use crate::config::Config;
use crate::database::{Database, DialogueSegment, EpisodeMeta, KeyPoint, Speaker, Summary};
use crate::elevenlabs::{SynthesisRequest, SynthesizedAudio, VoiceSynthesizer};
use crate::error::PipelineError;
use crate::openai::{StructuredSchema, TextGenerator};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use super::concat::AudioToolchain;
use super::Pipeline;

// ============================================================================
// Record observation
// ============================================================================

/// Snapshots one episode record each time a fake is called, so a test can
/// see what a poller would have seen at that moment.
pub struct RecordObserver {
    db: Arc<Database>,
    episode_id: String,
    seen: Mutex<Vec<EpisodeMeta>>,
}

impl RecordObserver {
    pub fn new(db: Arc<Database>, episode_id: &str) -> Arc<Self> {
        Arc::new(Self {
            db,
            episode_id: episode_id.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn snapshot(&self) {
        let meta = self.db.get_episode(&self.episode_id).unwrap().unwrap();
        self.seen.lock().unwrap().push(meta);
    }

    pub fn snapshots(&self) -> Vec<EpisodeMeta> {
        self.seen.lock().unwrap().clone()
    }
}

// ============================================================================
// Text generation
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeneratorCall {
    pub schema: String,
    pub system: String,
    pub user: String,
}

/// Returns queued responses in order. Panics when the queue runs dry.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<Option<Value>, PipelineError>>>,
    calls: Mutex<Vec<GeneratorCall>>,
    observer: Option<Arc<RecordObserver>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<Option<Value>, PipelineError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            observer: None,
        }
    }

    pub fn observed_by(mut self, observer: Arc<RecordObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn calls(&self) -> Vec<GeneratorCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: &StructuredSchema,
    ) -> Result<Option<Value>, PipelineError> {
        if let Some(observer) = &self.observer {
            observer.snapshot();
        }
        self.calls.lock().unwrap().push(GeneratorCall {
            schema: schema.name.to_string(),
            system: system.to_string(),
            user: user.to_string(),
        });
        let next = self.responses.lock().unwrap().pop_front();
        next.expect("no scripted response left")
    }
}

/// Answers every call with the response registered for its schema name, so
/// any number of runs can share it.
pub struct CannedGenerator {
    responses: HashMap<&'static str, Value>,
}

impl CannedGenerator {
    pub fn new(responses: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate_structured(
        &self,
        _system: &str,
        _user: &str,
        schema: &StructuredSchema,
    ) -> Result<Option<Value>, PipelineError> {
        Ok(self.responses.get(schema.name).cloned())
    }
}

// ============================================================================
// Speech synthesis
// ============================================================================

/// Answers call `n` with `audio-n` and continuity token `req-n`.
#[derive(Default)]
pub struct FakeSynthesizer {
    fail_from: Option<(usize, u16)>,
    fail_once: Option<(usize, u16)>,
    requests: Mutex<Vec<SynthesisRequest>>,
    observer: Option<Arc<RecordObserver>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed_by(mut self, observer: Arc<RecordObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Every call from index `call` on fails with `status`.
    pub fn failing_at(call: usize, status: u16) -> Self {
        Self {
            fail_from: Some((call, status)),
            ..Self::new()
        }
    }

    /// Only call `call` fails.
    pub fn failing_once_at(call: usize, status: u16) -> Self {
        Self {
            fail_once: Some((call, status)),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, PipelineError> {
        if let Some(observer) = &self.observer {
            observer.snapshot();
        }
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };

        let failure = match (self.fail_from, self.fail_once) {
            (Some((from, status)), _) if n >= from => Some(status),
            (_, Some((at, status))) if n == at => Some(status),
            _ => None,
        };
        if let Some(status) = failure {
            return Err(PipelineError::Upstream {
                service: "ElevenLabs",
                status: Some(status),
                message: "scripted failure".to_string(),
            });
        }

        Ok(SynthesizedAudio {
            audio: format!("audio-{}", n).into_bytes(),
            request_id: Some(format!("req-{}", n)),
        })
    }
}

// ============================================================================
// Audio tooling
// ============================================================================

pub struct FakeToolchain {
    duration: Option<f64>,
    fail: bool,
    concat_calls: AtomicUsize,
    delete_on_concat: Mutex<Option<(Arc<Database>, String)>>,
}

impl FakeToolchain {
    pub fn with_duration(duration: Option<f64>) -> Self {
        Self {
            duration,
            fail: false,
            concat_calls: AtomicUsize::new(0),
            delete_on_concat: Mutex::new(None),
        }
    }

    /// Delete newsletter `id` while the concat runs.
    pub fn delete_newsletter_on_concat(&self, db: Arc<Database>, id: &str) {
        *self.delete_on_concat.lock().unwrap() = Some((db, id.to_string()));
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_duration(None)
        }
    }

    pub fn concat_calls(&self) -> usize {
        self.concat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioToolchain for FakeToolchain {
    async fn concat(&self, list_path: &Path, output: &Path) -> Result<(), PipelineError> {
        self.concat_calls.fetch_add(1, Ordering::SeqCst);
        let doomed = self.delete_on_concat.lock().unwrap().take();
        if let Some((db, id)) = doomed {
            assert!(db.delete_newsletter(&id).unwrap());
        }
        if self.fail {
            return Err(PipelineError::Tool {
                tool: "ffmpeg",
                message: "scripted failure".to_string(),
            });
        }
        let list = tokio::fs::read_to_string(list_path).await?;
        tokio::fs::write(output, list).await?;
        Ok(())
    }

    async fn probe_duration(&self, _path: &Path) -> Result<Option<f64>, PipelineError> {
        Ok(self.duration)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn sample_summary(points: usize) -> Summary {
    Summary {
        title: "Sample Episode".to_string(),
        overall_theme: "Things worth talking about".to_string(),
        key_points: (1..=points)
            .map(|i| KeyPoint {
                topic: format!("Topic {}", i),
                summary: format!("Summary of topic {}.", i),
                details: format!("Details of topic {}.", i),
                significance: format!("Why topic {} matters.", i),
                surprising_angle: None,
            })
            .collect(),
    }
}

pub fn summary_json(title: &str, points: usize) -> Value {
    let mut summary = sample_summary(points);
    summary.title = title.to_string();
    serde_json::to_value(summary).unwrap()
}

pub fn dialogue(speakers: &[Speaker]) -> Vec<DialogueSegment> {
    speakers
        .iter()
        .enumerate()
        .map(|(i, speaker)| DialogueSegment {
            speaker: *speaker,
            text: format!("Line {} from {}.", i, speaker),
            topic: None,
        })
        .collect()
}

pub fn script_json(speakers: &[Speaker]) -> Value {
    json!({ "segments": dialogue(speakers) })
}

/// Config rooted at `data_dir` with both voices set and no waiting.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config {
        data_dir: data_dir.to_path_buf(),
        tts_delay_ms: 0,
        ..Default::default()
    };
    config.retry.base_delay_ms = 1;
    config.elevenlabs.voice_host_a = Some("voice-a".to_string());
    config.elevenlabs.voice_host_b = Some("voice-b".to_string());
    config
}

pub fn pipeline_with_config(
    config: &Config,
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn VoiceSynthesizer>,
    toolchain: Arc<dyn AudioToolchain>,
) -> Pipeline {
    let db = Arc::new(Database::new(&config.database_path()).unwrap());
    Pipeline::new(db, config, generator, synthesizer, toolchain)
}

pub fn test_pipeline(
    temp: &TempDir,
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn VoiceSynthesizer>,
    toolchain: Arc<dyn AudioToolchain>,
) -> Pipeline {
    pipeline_with_config(&test_config(temp.path()), generator, synthesizer, toolchain)
}
