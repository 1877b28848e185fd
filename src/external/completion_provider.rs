use async_trait::async_trait;
use serde::Serialize;

use crate::errors::LlmError;
use crate::external::stream::CompletionStream;
use crate::models::ChatMessage;

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Routed model id, e.g. `anthropic/claude-3.5-sonnet`
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A streaming text-completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send one request. Status errors (auth, throttling, transport) surface
    /// here; the returned stream yields fragments and then a final usage event.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, LlmError>;
}
