//! OpenAI chat-completions client.
//!
//! Wraps `POST {api_base}/chat/completions` with bearer auth, an input-size
//! guard, retry with backoff, and a mapping from HTTP failures onto
//! [`ResearchError`]. Works against any OpenAI-compatible endpoint by
//! changing `OPENAI_API_BASE`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use research_core::{
    retry_async, ChatCompletion, ChatMessage, ChatModel, ChatRequest, ResearchError, RetryPolicy,
    TokenUsage,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_INPUT_TOKENS: usize = 4000;
const SERVICE: &str = "OpenAI";

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Prompts estimated above this are rejected before sending
    pub max_input_tokens: usize,
    pub retry: RetryPolicy,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            retry: RetryPolicy::openai(),
        }
    }

    /// Reads OPENAI_API_KEY (required), OPENAI_API_BASE, OPENAI_MODEL and OPENAI_TIMEOUT.
    pub fn from_env() -> Result<Self, ResearchError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ResearchError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
            })?;

        let mut config = Self::new(api_key);
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            config = config.with_api_base(base);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config = config.with_model(model);
        }
        if let Some(timeout) = std::env::var("OPENAI_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config = config.with_timeout(timeout);
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

/// Turn an error response into a `ResearchError`, preferring the API's own message.
fn map_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> ResearchError {
    let message = serde_json::from_str::<OpenAIErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED => {
            ResearchError::Configuration("OpenAI rejected the API key".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => ResearchError::RateLimited {
            service: SERVICE.to_string(),
            retry_after_secs: retry_after,
        },
        s if s.is_server_error() => ResearchError::upstream(
            SERVICE,
            Some(s.as_u16()),
            format!("service unavailable: {}", message),
        ),
        s => ResearchError::upstream(SERVICE, Some(s.as_u16()), message),
    }
}

fn parse_completion(response: OpenAIResponse, requested_model: &str) -> Result<ChatCompletion, ResearchError> {
    let usage = response.usage.unwrap_or_default();
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ResearchError::Parse("No choices in OpenAI response".to_string()))?;

    Ok(ChatCompletion {
        content: choice.message.content.unwrap_or_default(),
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
        usage: TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens.max(usage.prompt_tokens + usage.completion_tokens),
        },
        finish_reason: choice.finish_reason,
    })
}

pub struct OpenAIClient {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIClient {
    pub fn with_config(config: OpenAIConfig) -> Result<Self, ResearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ResearchError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ResearchError> {
        Self::with_config(OpenAIConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn check_input_size(&self, messages: &[ChatMessage]) -> Result<(), ResearchError> {
        let estimated: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        if estimated > self.config.max_input_tokens {
            return Err(ResearchError::InvalidInput(format!(
                "Prompt too long: ~{} tokens (limit {})",
                estimated, self.config.max_input_tokens
            )));
        }
        Ok(())
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatCompletion, ResearchError> {
        let body = OpenAIRequest {
            model: &self.config.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResearchError::Timeout(SERVICE.to_string())
                } else {
                    ResearchError::upstream(SERVICE, None, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(map_error(status, &text, retry_after));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::Parse(format!("Failed to parse OpenAI response: {}", e)))?;

        parse_completion(parsed, &self.config.model)
    }

    #[instrument(skip(self, request), fields(model = %self.config.model, messages = request.messages.len()))]
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatCompletion, ResearchError> {
        self.check_input_size(&request.messages)?;

        let completion = retry_async(&self.config.retry, "OpenAI chat completion", || {
            self.send_once(&request)
        })
        .await?;

        debug!(
            "OpenAI completion: {} prompt + {} completion tokens, finish_reason={:?}",
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            completion.finish_reason
        );
        Ok(completion)
    }
}

#[async_trait]
impl ChatModel for OpenAIClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, ResearchError> {
        self.chat_completion(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base: &str) -> OpenAIClient {
        let config = OpenAIConfig::new("sk-test")
            .with_api_base(base)
            .with_retry(RetryPolicy::new(3, Duration::from_millis(5), 2.0));
        OpenAIClient::with_config(config).unwrap()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_map_error_statuses() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert!(matches!(
            map_error(StatusCode::UNAUTHORIZED, body, None),
            ResearchError::Configuration(_)
        ));
        assert!(matches!(
            map_error(StatusCode::TOO_MANY_REQUESTS, "", Some(7)),
            ResearchError::RateLimited { retry_after_secs: Some(7), .. }
        ));
        assert!(map_error(StatusCode::BAD_GATEWAY, "oops", None).is_retryable());

        let bad_request = map_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"max_tokens is too large"}}"#,
            None,
        );
        assert!(!bad_request.is_retryable());
        assert!(bad_request.to_string().contains("max_tokens is too large"));
    }

    #[test]
    fn test_parse_completion() {
        let raw = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"ok\":true}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        });
        let parsed: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let completion = parse_completion(parsed, DEFAULT_MODEL).unwrap();
        assert_eq!(completion.content, "{\"ok\":true}");
        assert_eq!(completion.usage.total_tokens, 150);
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));

        let empty: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(parse_completion(empty, DEFAULT_MODEL), Err(ResearchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_oversized_prompt_is_rejected_before_sending() {
        let client = client_for("http://127.0.0.1:9");
        let request = ChatRequest::new(vec![ChatMessage::user("x".repeat(16_004))]);
        let err = client.chat_completion(request).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_completion_round_trip_with_retry() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let counter = counter.clone();
                async move {
                    assert_eq!(headers["authorization"], "Bearer sk-test");
                    assert_eq!(body["model"], DEFAULT_MODEL);
                    assert_eq!(body["response_format"]["type"], "json_object");
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(AxumStatus::SERVICE_UNAVAILABLE);
                    }
                    Ok(Json(json!({
                        "model": DEFAULT_MODEL,
                        "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                        "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
                    })))
                }
            }),
        );
        let client = client_for(&spawn_server(router).await);

        let request = ChatRequest::new(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")])
            .with_temperature(0.3)
            .with_max_tokens(50)
            .json();
        let completion = client.complete(request).await.unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.usage.total_tokens, 12);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_key_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::UNAUTHORIZED
                }
            }),
        );
        let client = client_for(&spawn_server(router).await);

        let err = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Configuration(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
