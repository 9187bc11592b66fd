//! Text-generation service client.
//!
//! Calls the chat completions API with a JSON-schema response format and
//! hands back the structured result.

use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "OpenAI";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Named JSON schema the service's output must conform to.
#[derive(Debug, Clone)]
pub struct StructuredSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

/// Anything that turns a system instruction plus a user payload into a
/// structured JSON value.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `Ok(None)` means the service answered without a usable structured
    /// result (refusal, empty content, unparseable JSON).
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: &StructuredSchema,
    ) -> Result<Option<serde_json::Value>, PipelineError>;
}

/// OpenAI client for making API calls
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: crate::config::DEFAULT_OPENAI_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, system: &str, user: &str, schema: &StructuredSchema) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: schema.name.to_string(),
                    strict: true,
                    schema: schema.schema.clone(),
                },
            },
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: &StructuredSchema,
    ) -> Result<Option<serde_json::Value>, PipelineError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("Missing environment variable: OPENAI_API_KEY".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(system, user, schema);

        log::info!(
            "Sending request to OpenAI: model={}, schema={}, payload_len={}",
            self.model,
            schema.name,
            user.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Upstream {
                service: SERVICE,
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream {
                service: SERVICE,
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let result: ChatResponse = response.json().await.map_err(|e| PipelineError::Upstream {
            service: SERVICE,
            status: None,
            message: format!("Failed to read response body: {}", e),
        })?;

        Ok(structured_content(&result))
    }
}

/// Pull the structured value out of the first choice, if there is one.
fn structured_content(response: &ChatResponse) -> Option<serde_json::Value> {
    let message = &response.choices.first()?.message;
    if let Some(refusal) = &message.refusal {
        log::warn!("OpenAI refused the request: {}", refusal);
        return None;
    }
    let content = message.content.as_deref()?;
    extract_json_from_response(content)
}

/// Extract a JSON object from model output (handles markdown code blocks)
fn extract_json_from_response(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(json);
    }

    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(after_marker[..end].trim()) {
                return Some(json);
            }
        }
    }

    // Outermost object embedded in prose
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]).ok()
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec,
}

#[derive(Debug, Serialize)]
struct JsonSchemaSpec {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: Option<&str>, refusal: Option<&str>) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: content.map(str::to_string),
                    refusal: refusal.map(str::to_string),
                },
            }],
        }
    }

    #[test]
    fn test_extract_json_from_response() {
        let json = extract_json_from_response(r#"{"name": "test"}"#);
        assert_eq!(json, Some(json!({"name": "test"})));

        let json = extract_json_from_response(
            r#"Here's the result:
```json
{"items": [1, 2, 3]}
```
"#,
        );
        assert_eq!(json, Some(json!({"items": [1, 2, 3]})));

        let json = extract_json_from_response(r#"The data is: {"value": {"n": 42}} done."#);
        assert_eq!(json, Some(json!({"value": {"n": 42}})));

        assert!(extract_json_from_response("no json here").is_none());
    }

    #[test]
    fn test_structured_content_none_on_refusal_or_empty() {
        assert!(structured_content(&response(None, Some("I can't help with that"))).is_none());
        assert!(structured_content(&response(None, None)).is_none());
        assert!(structured_content(&ChatResponse { choices: vec![] }).is_none());
        assert_eq!(
            structured_content(&response(Some(r#"{"segments": []}"#), None)),
            Some(json!({"segments": []}))
        );
    }

    #[test]
    fn test_request_uses_strict_json_schema() {
        let client = OpenAiClient::new("https://example.test/v1/", None).with_model("gpt-4o-mini");
        let schema = StructuredSchema {
            name: "demo",
            schema: json!({"type": "object"}),
        };
        let body = serde_json::to_value(client.build_request("sys", "user", &schema)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "demo");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(client.base_url, "https://example.test/v1");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let client = OpenAiClient::new("http://127.0.0.1:9", None);
        let schema = StructuredSchema {
            name: "demo",
            schema: json!({"type": "object"}),
        };
        let err = client
            .generate_structured("sys", "user", &schema)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
