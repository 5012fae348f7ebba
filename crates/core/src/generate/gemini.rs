//! Google Gemini backend.
//! Talks to the `generateContent` and `streamGenerateContent` endpoints and
//! passes the API key in a header so it never shows up in logged URLs.

use super::{sse, CompletionBackend, CompletionRequest, FragmentStream, ModelTier};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Completion backend for the Gemini API.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    fast_model: String,
    quality_model: String,
}

impl GeminiBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    /// Create a backend from `config`, failing when no key is configured.
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config.require_key()?.to_string();
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| {
            GenerationError::configuration(format!("failed to create HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            fast_model: config.fast_model.clone(),
            quality_model: config.quality_model.clone(),
        })
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Quality => &self.quality_model,
        }
    }

    fn body(request: &CompletionRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            system_instruction: request
                .system
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| Content {
                    role: None,
                    parts: vec![Part { text: s.clone() }],
                }),
            generation_config: GenerationSettings {
                temperature: request.temperature,
            },
        }
    }

    /// POST `request` to `{model}:{method}` and return the successful response.
    async fn post(
        &self,
        request: &CompletionRequest,
        method: &str,
    ) -> Result<Response, GenerationError> {
        let model = self.model(request.tier);
        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        trace!("gemini POST {url}");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| GenerationError::service(format!("request failed: {e}")))?;
        check_status(response).await
    }
}

/// Map non-success statuses to errors, keeping the service's message.
async fn check_status(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    debug!("gemini returned {status}: {message}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GenerationError::RateLimited { message });
    }
    Err(GenerationError::Service {
        status: Some(status.as_u16()),
        message: format!("Gemini API error ({status}): {message}"),
    })
}

/// Text of the first candidate, or an error when the prompt was blocked.
fn candidate_text(response: GenerateContentResponse) -> Result<Option<String>, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::service(format!(
            "content blocked by Gemini safety filters: {reason}"
        )));
    }
    Ok(response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>()))
}

fn stream_payload(payload: &str) -> Result<Option<String>, GenerationError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::InvalidResponse(format!("bad stream event: {e}")))?;
    candidate_text(response)
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let response = self.post(&request, "generateContent").await?;
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::service(format!("failed to read response: {e}")))?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::InvalidResponse(format!("failed to parse response: {e}")))?;
        Ok(candidate_text(parsed)?.unwrap_or_default())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, GenerationError> {
        let response = self
            .post(&request, "streamGenerateContent?alt=sse")
            .await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::Stream(e.to_string())));
        Ok(sse::fragments(body, stream_payload))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationSettings,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GenerationSettings {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use httpmock::prelude::*;
    use serde_json::json;

    fn backend(server: &MockServer) -> GeminiBackend {
        let config = GenerationConfig::default()
            .with_api_key("test-key")
            .with_base_url(server.base_url());
        GeminiBackend::new(&config).unwrap()
    }

    fn request(tier: ModelTier) -> CompletionRequest {
        CompletionRequest {
            prompt: "Hello".into(),
            system: Some("Be terse.".into()),
            temperature: 0.2,
            tier,
        }
    }

    #[test]
    fn builds_body_with_system_instruction() {
        let body = serde_json::to_value(GeminiBackend::body(&request(ModelTier::Fast))).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert!(body["systemInstruction"].get("role").is_none());
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn completes_with_fast_model() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-3-flash-preview:generateContent")
                    .header("x-goog-api-key", "test-key");
                then.status(200).json_body(json!({
                    "candidates": [{"content": {"role": "model", "parts": [{"text": "1\n00:00:00,000"}, {"text": " --> 00:00:01,000\nOi\n"}]}}]
                }));
            })
            .await;
        let text = backend(&server).complete(request(ModelTier::Fast)).await.unwrap();
        assert_eq!(text, "1\n00:00:00,000 --> 00:00:01,000\nOi\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(429).json_body(json!({
                    "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
                }));
            })
            .await;
        let err = backend(&server)
            .complete(request(ModelTier::Quality))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Resource has been exhausted"));
    }

    #[tokio::test]
    async fn server_error_is_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).body("forbidden");
            })
            .await;
        let err = backend(&server)
            .complete(request(ModelTier::Quality))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Service { status: Some(403), .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn blocked_prompt_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .json_body(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
            })
            .await;
        let err = backend(&server)
            .complete(request(ModelTier::Quality))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let server = MockServer::start_async().await;
        let events = [
            json!({"candidates": [{"content": {"parts": [{"text": "1\n00:00:00,000 --> "}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "00:00:01,000\n"}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "Noir.\n"}]}}]}),
        ]
        .iter()
        .map(|e| format!("data: {e}\r\n\r\n"))
        .collect::<String>();
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-3-pro-preview:streamGenerateContent")
                    .query_param("alt", "sse");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(&events);
            })
            .await;
        let stream = backend(&server)
            .stream(request(ModelTier::Quality))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            parts,
            vec!["1\n00:00:00,000 --> ", "00:00:01,000\n", "Noir.\n"]
        );
    }
}
