//! OpenAI-compatible backend.
//! This uses the chat completions API; streaming runs over server-sent events.

use super::{sse, CompletionBackend, CompletionRequest, FragmentStream, ModelTier};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

/// Completion backend that delegates to an OpenAI chat completion endpoint.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    fast_model: String,
    quality_model: String,
}

impl OpenAiBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

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

    /// Build the chat body: optional system message, then the prompt.
    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system.as_ref().filter(|s| !s.trim().is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        let model = match request.tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Quality => &self.quality_model,
        };
        json!({
            "model": model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    /// Send a JSON body to the chat completions endpoint.
    async fn post_chat(&self, body: Value) -> Result<Response, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        trace!("openai POST {url}");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::service(format!("request failed: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        debug!("openai returned {status}: {message}");
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited { message });
        }
        Err(GenerationError::Service {
            status: Some(status.as_u16()),
            message: format!("OpenAI API error ({status}): {message}"),
        })
    }
}

/// Pull `choices[0].delta.content` out of one streamed chunk.
fn delta_content(payload: &str) -> Result<Option<String>, GenerationError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| GenerationError::InvalidResponse(format!("bad stream event: {e}")))?;
    Ok(value["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string))
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let resp = self.post_chat(self.body(&request, false)).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(format!("failed to parse response: {e}")))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError::InvalidResponse("missing content".into()))?;
        Ok(content.to_string())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, GenerationError> {
        let resp = self.post_chat(self.body(&request, true)).await?;
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::Stream(e.to_string())));
        Ok(sse::fragments(body, delta_content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use httpmock::prelude::*;

    fn backend(server: &MockServer) -> OpenAiBackend {
        let config = GenerationConfig::for_backend(BackendKind::OpenAi)
            .with_api_key("sk-test")
            .with_base_url(server.base_url());
        OpenAiBackend::new(&config).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "Rewrite".into(),
            system: None,
            temperature: 0.7,
            tier: ModelTier::Quality,
        }
    }

    #[test]
    fn body_skips_missing_system_message() {
        let config = GenerationConfig::for_backend(BackendKind::OpenAi).with_api_key("k");
        let backend = OpenAiBackend::new(&config).unwrap();
        let body = backend.body(&request(), false);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn completes_chat() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "Texto novo"}}]
                }));
            })
            .await;
        let text = backend(&server).complete(request()).await.unwrap();
        assert_eq!(text, "Texto novo");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retryable_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429)
                    .json_body(json!({"error": {"message": "Rate limit reached"}}));
            })
            .await;
        let err = backend(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn streams_deltas_until_done() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Era \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"uma vez\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .json_body_partial(r#"{"stream": true}"#);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;
        let stream = backend(&server).stream(request()).await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["Era ", "uma vez"]);
    }
}
