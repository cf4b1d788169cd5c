//! Completion service abstraction and the OpenAI chat-completions client.
//!
//! The router only sees [`CompletionService`]; the gateway injects an [`OpenAiClient`],
//! tests inject fakes.

mod openai;

use async_trait::async_trait;

pub use openai::{OpenAiClient, OpenAiModel};

/// One single-turn completion: persona plus the user's text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub model: String,
    pub temperature: f32,
}

/// Generated reply text; `None` when the service answered without any content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
    #[error("completion timed out after {0}s")]
    Timeout(u64),
}

/// Remote text completion. One call per request, no retries.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
