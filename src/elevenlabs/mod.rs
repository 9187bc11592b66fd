//! Voice-synthesis service client.
//!
//! One request per dialogue segment. The response body is the encoded
//! audio; the `request-id` header is the continuity token later requests
//! for the same speaker can reference.

use crate::config::VoiceSettings;
use crate::error::PipelineError;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;

const SERVICE: &str = "ElevenLabs";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const REQUEST_ID_HEADER: &str = "request-id";

/// Maximum number of prior continuity tokens sent with one request.
pub const MAX_PREVIOUS_REQUEST_IDS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub settings: VoiceSettings,
    /// Most recent continuity tokens for this speaker, oldest first.
    pub previous_request_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, PipelineError>;
}

pub struct ElevenLabsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ElevenLabsClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn upstream(status: Option<u16>, message: String) -> PipelineError {
    PipelineError::Upstream {
        service: SERVICE,
        status,
        message,
    }
}

#[async_trait]
impl VoiceSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio, PipelineError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::Config("Missing environment variable: ELEVENLABS_API_KEY".to_string())
        })?;

        let url = format!("{}/v1/text-to-speech/{}", self.base_url, request.voice_id);
        let body = TextToSpeechBody::from(request);

        log::debug!(
            "Requesting speech: voice={}, text_len={}, previous_ids={}",
            request.voice_id,
            request.text.len(),
            request.previous_request_ids.len()
        );

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", request.output_format.as_str())])
            .header("xi-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(e.status().map(|s| s.as_u16()), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(Some(status.as_u16()), body));
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut audio = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| upstream(None, format!("Error reading audio stream: {}", e)))?;
            audio.extend_from_slice(&chunk);
        }

        Ok(SynthesizedAudio { audio, request_id })
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TextToSpeechBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettingsBody,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    previous_request_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct VoiceSettingsBody {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

impl<'a> From<&'a SynthesisRequest> for TextToSpeechBody<'a> {
    fn from(request: &'a SynthesisRequest) -> Self {
        let ids = &request.previous_request_ids;
        let keep_from = ids.len().saturating_sub(MAX_PREVIOUS_REQUEST_IDS);
        Self {
            text: &request.text,
            model_id: &request.model_id,
            voice_settings: VoiceSettingsBody {
                stability: request.settings.stability,
                similarity_boost: request.settings.similarity_boost,
                style: request.settings.style,
                use_speaker_boost: request.settings.use_speaker_boost,
            },
            previous_request_ids: ids[keep_from..].to_vec(),
        }
    }
}
