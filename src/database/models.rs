use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of characters of source text kept on the episode record.
pub const PREVIEW_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    #[default]
    Processing,
    Summarizing,
    Scripting,
    GeneratingAudio,
    Complete,
    Error,
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpisodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "summarizing" => Ok(Self::Summarizing),
            "scripting" => Ok(Self::Scripting),
            "generating_audio" => Ok(Self::GeneratingAudio),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown episode status: {}", other)),
        }
    }
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Summarizing => "summarizing",
            Self::Scripting => "scripting",
            Self::GeneratingAudio => "generating_audio",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Position along the pipeline. `Error` sits outside the ordering.
    fn stage_index(&self) -> Option<u8> {
        match self {
            Self::Processing => Some(0),
            Self::Summarizing => Some(1),
            Self::Scripting => Some(2),
            Self::GeneratingAudio => Some(3),
            Self::Complete => Some(4),
            Self::Error => None,
        }
    }

    /// Whether a record in `self` may be moved to `next`.
    ///
    /// Staying put is allowed (progress counters update in place), as is any
    /// forward move. `Error` is reachable from every non-terminal status.
    /// Nothing leaves a terminal status.
    pub fn can_transition_to(&self, next: EpisodeStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        match (self.stage_index(), next.stage_index()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Paste,
    Newsletters,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paste => "paste",
            Self::Newsletters => "newsletters",
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "newsletters" => Self::Newsletters,
            _ => Self::Paste,
        }
    }
}

/// Where the text of an episode came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Paste,
    Newsletters(Vec<String>),
}

impl SourceDescriptor {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Paste => SourceType::Paste,
            Self::Newsletters(_) => SourceType::Newsletters,
        }
    }

    pub fn newsletter_ids(&self) -> Option<&[String]> {
        match self {
            Self::Paste => None,
            Self::Newsletters(ids) => Some(ids),
        }
    }
}

/// Persisted status record of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMeta {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub status: EpisodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_segment: Option<i64>,
    pub source_text_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_newsletter_ids: Option<Vec<String>>,
}

/// Partial update merged into an [`EpisodeMeta`]. Unset fields keep their
/// stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodePatch {
    pub title: Option<String>,
    pub status: Option<EpisodeStatus>,
    pub duration: Option<f64>,
    pub segment_count: Option<i64>,
    pub total_segments: Option<i64>,
    pub current_segment: Option<i64>,
    pub error: Option<String>,
}

impl EpisodePatch {
    pub fn status(status: EpisodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(&self, meta: &mut EpisodeMeta) {
        if let Some(title) = &self.title {
            meta.title = title.clone();
        }
        if let Some(status) = self.status {
            meta.status = status;
        }
        if let Some(duration) = self.duration {
            meta.duration = Some(duration);
        }
        if let Some(count) = self.segment_count {
            meta.segment_count = Some(count);
        }
        if let Some(total) = self.total_segments {
            meta.total_segments = Some(total);
        }
        if let Some(current) = self.current_segment {
            meta.current_segment = Some(current);
        }
        if let Some(error) = &self.error {
            meta.error = Some(error.clone());
        }
    }
}

/// One of the two fixed hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "hostA")]
    HostA,
    #[serde(rename = "hostB")]
    HostB,
}

impl Speaker {
    /// Tag used in segment file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::HostA => "hostA",
            Self::HostB => "hostB",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub topic: String,
    pub summary: String,
    pub details: String,
    pub significance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surprising_angle: Option<String>,
}

/// Structured digest of the source text. Not persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub overall_theme: String,
    pub key_points: Vec<KeyPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueSegment {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Ordered dialogue. Index order is playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueScript {
    pub segments: Vec<DialogueSegment>,
}

/// Stored newsletter source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub content_preview: String,
    pub content_length: i64,
    pub used: bool,
    pub episode_ids: Vec<String>,
}

/// Newsletter body as read by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsletterContent {
    pub sender: String,
    pub subject: String,
    pub content: String,
}

/// First [`PREVIEW_LENGTH`] characters of `text`, on a char boundary.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_transitions() {
        use EpisodeStatus::*;
        assert!(Processing.can_transition_to(Summarizing));
        assert!(Summarizing.can_transition_to(Scripting));
        assert!(Scripting.can_transition_to(GeneratingAudio));
        assert!(GeneratingAudio.can_transition_to(GeneratingAudio));
        assert!(GeneratingAudio.can_transition_to(Complete));
        assert!(Processing.can_transition_to(Complete));
    }

    #[test]
    fn test_status_backward_and_terminal_transitions() {
        use EpisodeStatus::*;
        assert!(!Scripting.can_transition_to(Summarizing));
        assert!(!GeneratingAudio.can_transition_to(Processing));
        assert!(!Complete.can_transition_to(Error));
        assert!(!Error.can_transition_to(Processing));
        assert!(Complete.can_transition_to(Complete));
        for status in [Processing, Summarizing, Scripting, GeneratingAudio] {
            assert!(status.can_transition_to(Error), "{} -> error", status);
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            EpisodeStatus::Processing,
            EpisodeStatus::GeneratingAudio,
            EpisodeStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<EpisodeStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<EpisodeStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&EpisodeStatus::GeneratingAudio).unwrap(),
            "\"generating_audio\""
        );
    }

    #[test]
    fn test_speaker_serde_uses_host_tags() {
        let seg: DialogueSegment =
            serde_json::from_str(r#"{"speaker":"hostB","text":"Right.","topic":null}"#).unwrap();
        assert_eq!(seg.speaker, Speaker::HostB);
        assert_eq!(serde_json::to_string(&Speaker::HostA).unwrap(), "\"hostA\"");
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut meta = EpisodeMeta {
            id: "e1".into(),
            title: "Processing...".into(),
            created_at: Utc::now(),
            status: EpisodeStatus::Scripting,
            duration: None,
            segment_count: None,
            total_segments: None,
            current_segment: None,
            source_text_preview: "hello".into(),
            error: None,
            source_type: SourceType::Paste,
            source_newsletter_ids: None,
        };
        EpisodePatch {
            current_segment: Some(3),
            ..Default::default()
        }
        .apply(&mut meta);
        assert_eq!(meta.current_segment, Some(3));
        assert_eq!(meta.title, "Processing...");
        assert_eq!(meta.status, EpisodeStatus::Scripting);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "é".repeat(300);
        let p = preview(&text);
        assert_eq!(p.chars().count(), PREVIEW_LENGTH);
        assert_eq!(preview("short"), "short");
    }
}
