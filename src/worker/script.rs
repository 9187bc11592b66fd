use crate::database::{DialogueScript, KeyPoint, Summary};
use crate::error::PipelineError;
use crate::openai::{StructuredSchema, TextGenerator};
use serde_json::json;

use super::retry::{with_retry, RetryPolicy};

const PARSE_FAILURE: &str = "Failed to parse dialogue script from model response";

const SYSTEM_PROMPT: &str = "You write natural two-host podcast dialogue from a set of key points.

HOST A (\"Alex\") leads: introduces topics, gives context, explains why they matter, steers the conversation.
HOST B (\"Sam\") co-hosts: reacts, asks clarifying questions, adds color and alternative takes, keeps it casual.

Each host owns some of the topics and goes deeper on those: they bring the specifics and carry the explanation while the other host reacts.

Structure:
1. Cold open: Host A introduces the theme (1-2 lines), Host B reacts and sets expectations (1 line).
2. For each key point: the owning host introduces it with the key facts, 2-4 exchanges of back-and-forth, then a natural transition.
3. Wrap-up: both hosts pull out the takeaways (2-3 lines).
4. Sign-off: short and friendly (1-2 lines).

Rules:
- 15-30 segments in total, 1-4 sentences each.
- Conversational language with contractions and natural reactions.
- Attribute facts to the newsletter, never present them as the hosts' own research.
- Never break character.
- Set `topic` to the key point a line discusses, or null for intros, transitions and the outro.";

/// Output contract for the script call.
pub fn script_schema() -> StructuredSchema {
    StructuredSchema {
        name: "dialogue_script",
        schema: json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["segments"],
            "properties": {
                "segments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["speaker", "text", "topic"],
                        "properties": {
                            "speaker": { "type": "string", "enum": ["hostA", "hostB"] },
                            "text": { "type": "string", "description": "The spoken line, 1-4 sentences" },
                            "topic": {
                                "type": ["string", "null"],
                                "description": "Which key point this relates to, or null"
                            }
                        }
                    }
                }
            }
        }),
    }
}

/// Split key points between the hosts: first half to host A, rest to host B.
pub fn split_key_points(points: &[KeyPoint]) -> (&[KeyPoint], &[KeyPoint]) {
    points.split_at(points.len().div_ceil(2))
}

fn format_key_point(index: usize, point: &KeyPoint) -> String {
    let mut out = format!(
        "{}. **{}**: {}\n   Details: {}\n   Significance: {}",
        index + 1,
        point.topic,
        point.summary,
        point.details,
        point.significance
    );
    if let Some(angle) = &point.surprising_angle {
        out.push_str(&format!("\n   Surprising angle: {}", angle));
    }
    out
}

fn topic_list(points: &[KeyPoint]) -> String {
    if points.is_empty() {
        return "(none)".to_string();
    }
    points
        .iter()
        .map(|p| p.topic.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the user payload for the script call.
pub fn build_script_prompt(summary: &Summary) -> String {
    let key_points = summary
        .key_points
        .iter()
        .enumerate()
        .map(|(i, kp)| format_key_point(i, kp))
        .collect::<Vec<_>>()
        .join("\n\n");
    let (host_a, host_b) = split_key_points(&summary.key_points);

    format!(
        "Create a podcast dialogue script based on these key points.\n\n\
         Title: {}\nOverall Theme: {}\n\n\
         Key Points:\n{}\n\n\
         Topic ownership:\n- Host A leads: {}\n- Host B leads: {}",
        summary.title,
        summary.overall_theme,
        key_points,
        topic_list(host_a),
        topic_list(host_b)
    )
}

/// Expand a [`Summary`] into an ordered two-host [`DialogueScript`].
pub async fn generate_script(
    generator: &dyn TextGenerator,
    retry: RetryPolicy,
    summary: &Summary,
) -> Result<DialogueScript, PipelineError> {
    let schema = script_schema();
    let payload = build_script_prompt(summary);

    with_retry(retry, || async {
        let value = generator
            .generate_structured(SYSTEM_PROMPT, &payload, &schema)
            .await?
            .ok_or_else(|| PipelineError::Parse(PARSE_FAILURE.to_string()))?;
        serde_json::from_value::<DialogueScript>(value).map_err(|e| {
            log::warn!("Dialogue script did not match schema: {}", e);
            PipelineError::Parse(PARSE_FAILURE.to_string())
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Speaker;
    use crate::worker::testing::{sample_summary, ScriptedGenerator};
    use std::time::Duration;

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_split_gives_host_a_the_larger_half() {
        let summary = sample_summary(5);
        let (a, b) = split_key_points(&summary.key_points);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
        assert_eq!(a[0].topic, "Topic 1");
        assert_eq!(b[0].topic, "Topic 4");

        let summary = sample_summary(4);
        let (a, b) = split_key_points(&summary.key_points);
        assert_eq!((a.len(), b.len()), (2, 2));

        let (a, b) = split_key_points(&[]);
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_prompt_lists_points_and_ownership() {
        let mut summary = sample_summary(3);
        summary.key_points[1].surprising_angle = Some("Nobody expected it".to_string());
        let prompt = build_script_prompt(&summary);

        assert!(prompt.contains("Title: Sample Episode"));
        assert!(prompt.contains("1. **Topic 1**"));
        assert!(prompt.contains("3. **Topic 3**"));
        assert!(prompt.contains("Surprising angle: Nobody expected it"));
        assert!(prompt.contains("Host A leads: Topic 1, Topic 2"));
        assert!(prompt.contains("Host B leads: Topic 3"));
    }

    #[tokio::test]
    async fn test_generate_script_keeps_segment_order() {
        let generator = ScriptedGenerator::new(vec![Ok(Some(json!({
            "segments": [
                {"speaker": "hostA", "text": "Welcome in.", "topic": null},
                {"speaker": "hostB", "text": "Glad to be here.", "topic": null},
                {"speaker": "hostA", "text": "First up, chips.", "topic": "Topic 1"}
            ]
        })))]);

        let script = generate_script(&generator, no_retry(), &sample_summary(2))
            .await
            .unwrap();
        let speakers: Vec<Speaker> = script.segments.iter().map(|s| s.speaker).collect();
        assert_eq!(speakers, vec![Speaker::HostA, Speaker::HostB, Speaker::HostA]);
        assert_eq!(script.segments[2].topic.as_deref(), Some("Topic 1"));
        assert_eq!(generator.calls()[0].schema, "dialogue_script");
    }

    #[tokio::test]
    async fn test_unknown_speaker_is_parse_failure() {
        let generator = ScriptedGenerator::new(vec![Ok(Some(json!({
            "segments": [{"speaker": "hostC", "text": "Hi", "topic": null}]
        })))]);
        let err = generate_script(&generator, no_retry(), &sample_summary(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), PARSE_FAILURE);
    }

    #[tokio::test]
    async fn test_bad_request_fails_without_retry() {
        let generator = ScriptedGenerator::new(vec![Err(PipelineError::Upstream {
            service: "OpenAI",
            status: Some(400),
            message: "bad schema".into(),
        })]);
        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let err = generate_script(&generator, retry, &sample_summary(1))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(generator.calls().len(), 1);
    }
}
