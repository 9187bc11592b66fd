//! Runtime configuration.
//!
//! Values come from an optional `config.yaml`, then from a `.env` file in
//! the working directory, then from the process environment. Later sources
//! win.

use crate::database::Speaker;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_multilingual_v2";
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";
pub const MAX_INPUT_LENGTH: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub openai: OpenAiConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub retry: RetryConfig,
    pub tools: ToolConfig,
    /// Delay between consecutive synthesis requests, in milliseconds.
    pub tts_delay_ms: u64,
    pub max_input_length: usize,
    /// Mark episodes left in a non-terminal status as errored when the
    /// runner starts. Only safe when one process owns the data directory.
    pub reconcile_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub output_format: String,
    pub voice_host_a: Option<String>,
    pub voice_host_b: Option<String>,
    pub host_a: VoiceSettings,
    pub host_b: VoiceSettings,
}

/// Style parameters sent with every synthesis request for one speaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsletter-podcast");
        Self {
            data_dir,
            openai: OpenAiConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            retry: RetryConfig::default(),
            tools: ToolConfig::default(),
            tts_delay_ms: 500,
            max_input_length: MAX_INPUT_LENGTH,
            reconcile_on_startup: false,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
        }
    }
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_ELEVENLABS_BASE_URL.to_string(),
            model: DEFAULT_ELEVENLABS_MODEL.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            voice_host_a: None,
            voice_host_b: None,
            host_a: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                style: 0.2,
                use_speaker_boost: true,
            },
            host_b: VoiceSettings {
                stability: 0.4,
                similarity_boost: 0.75,
                style: 0.4,
                use_speaker_boost: true,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl ElevenLabsConfig {
    /// Voice identity and the env key it is read from, per speaker.
    pub fn voice_for(&self, speaker: Speaker) -> (Option<&str>, &'static str) {
        match speaker {
            Speaker::HostA => (self.voice_host_a.as_deref(), "ELEVENLABS_VOICE_HOST_A"),
            Speaker::HostB => (self.voice_host_b.as_deref(), "ELEVENLABS_VOICE_HOST_B"),
        }
    }

    pub fn settings_for(&self, speaker: Speaker) -> VoiceSettings {
        match speaker {
            Speaker::HostA => self.host_a,
            Speaker::HostB => self.host_b,
        }
    }
}

impl Config {
    /// Load configuration, applying `.env` and environment overrides.
    ///
    /// A missing config file is not an error; an unreadable or malformed one is.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            Some(path) => {
                log::info!("No config file at {}, using defaults", path.display());
                Config::default()
            }
            None => Config::default(),
        };

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        config.apply_overrides(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(&cwd, key))
        });
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment, `.env`, or a test map).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PODCAST_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(key) = lookup("ELEVENLABS_API_KEY") {
            self.elevenlabs.api_key = Some(key);
        }
        if let Some(url) = lookup("ELEVENLABS_BASE_URL") {
            self.elevenlabs.base_url = url;
        }
        if let Some(voice) = lookup("ELEVENLABS_VOICE_HOST_A") {
            self.elevenlabs.voice_host_a = Some(voice);
        }
        if let Some(voice) = lookup("ELEVENLABS_VOICE_HOST_B") {
            self.elevenlabs.voice_host_b = Some(voice);
        }
    }

    pub fn tts_delay(&self) -> Duration {
        Duration::from_millis(self.tts_delay_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("podcast.db")
    }
}

/// Load a value from the .env file in `dir` by key name
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}
