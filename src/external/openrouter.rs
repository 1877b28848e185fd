use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::LlmError;
use crate::external::completion_provider::{CompletionProvider, CompletionRequest};
use crate::external::stream::CompletionStream;
use crate::models::ChatMessage;
use crate::utils::estimate_conversation_tokens;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const APP_TITLE: &str = "chatmeter";

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenRouterRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Streaming client for OpenRouter's OpenAI-compatible chat completions.
pub struct OpenRouterProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl OpenRouterProvider {
    /// `timeout` bounds the wait for response headers; a long-running stream
    /// is not cut off once it has started.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Pull a readable message out of an error response body.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn status_error(status: StatusCode, body: &str) -> LlmError {
    let message = error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited,
        _ => LlmError::Api { status: status.as_u16(), message },
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn stream_completion(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
        let body = OpenRouterRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        info!(
            "🤖 Requesting completion from {} (model: {}, messages: {})",
            self.name(),
            request.model,
            request.messages.len()
        );

        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send();

        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result.map_err(|e| {
                error!("Completion request failed: {}", e);
                LlmError::from_transport(e)
            })?,
            Err(_) => {
                warn!("Completion request timed out after {:?}", self.timeout);
                return Err(LlmError::Timeout);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = status_error(status, &text);
            error!("Completion API returned {}: {}", status, err);
            return Err(err);
        }

        let input_estimate = estimate_conversation_tokens(&request.messages);
        Ok(CompletionStream::from_sse(response.bytes_stream(), input_estimate))
    }
}
