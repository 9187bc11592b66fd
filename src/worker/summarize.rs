use crate::database::Summary;
use crate::error::PipelineError;
use crate::openai::{StructuredSchema, TextGenerator};
use serde_json::json;

use super::retry::{with_retry, RetryPolicy};

const PARSE_FAILURE: &str = "Failed to parse summary from model response";

const SYSTEM_PROMPT: &str = "You are an editorial analyst preparing source material for a two-host deep-dive podcast. \
You receive the raw text of one or more newsletters and extract the points most worth talking about.

Rules:
- Extract 3-6 key points. Depth beats breadth.
- Every key point needs concrete detail: facts, numbers, names, quotes and examples from the source, enough for several minutes of conversation.
- Keep figures, names and quotes exactly as written.
- Name what is surprising, counterintuitive or debatable about each point.
- Explain significance in concrete, real-world terms.
- Never add information that is not in the source.
- The title should read like an episode people want to hear: specific and intriguing, 5-10 words.
- State the overall theme that ties the points together.";

/// Output contract for the summary call.
pub fn summary_schema() -> StructuredSchema {
    let text = |description: &str| json!({ "type": "string", "description": description });
    StructuredSchema {
        name: "newsletter_summary",
        schema: json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["title", "overall_theme", "key_points"],
            "properties": {
                "title": text("A concise podcast episode title, 5-10 words"),
                "overall_theme": text("The overarching theme tying these points together"),
                "key_points": {
                    "type": "array",
                    "description": "3-6 key points extracted from the source",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["topic", "summary", "details", "significance", "surprising_angle"],
                        "properties": {
                            "topic": text("Short topic label, 2-4 words"),
                            "summary": text("2-3 sentence summary of this point"),
                            "details": text("4-6 sentences of specific facts, numbers, names and examples"),
                            "significance": text("Why this matters to the audience, 2-3 sentences"),
                            "surprising_angle": {
                                "type": ["string", "null"],
                                "description": "The most surprising or debatable aspect, 1-2 sentences"
                            }
                        }
                    }
                }
            }
        }),
    }
}

fn user_payload(text: &str) -> String {
    format!(
        "Here is the newsletter text to analyze. Extract detailed key points with specific facts and interesting angles:\n\n---\n{}\n---",
        text
    )
}

/// Reduce raw source text to a structured [`Summary`].
pub async fn summarize_text(
    generator: &dyn TextGenerator,
    retry: RetryPolicy,
    text: &str,
) -> Result<Summary, PipelineError> {
    let schema = summary_schema();
    let payload = user_payload(text);

    with_retry(retry, || async {
        let value = generator
            .generate_structured(SYSTEM_PROMPT, &payload, &schema)
            .await?
            .ok_or_else(|| PipelineError::Parse(PARSE_FAILURE.to_string()))?;
        serde_json::from_value::<Summary>(value).map_err(|e| {
            log::warn!("Summary did not match schema: {}", e);
            PipelineError::Parse(PARSE_FAILURE.to_string())
        })
    })
    .await
}
