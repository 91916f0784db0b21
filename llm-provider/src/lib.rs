//! Provider seams for embeddings and LLM completion, plus the
//! OpenAI-compatible HTTP implementations. Providers are constructor-injected
//! into the services that need them; there is no process-global client.

pub mod config;
pub mod openai;

use serde::{Deserialize, Serialize};

/// Fixed probe string used to discover the embedding dimension at startup.
pub const PROBE_TEXT: &str = "__probe__";

/// Errors produced by provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration invalid: {0}")]
    InvalidConfiguration(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// One message handed to the structured-parse endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Text-to-vector provider. Vectors must be usable for inner-product
/// similarity after L2 normalisation.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed the fixed probe string; callers take the length as the
    /// system-wide dimension `D`.
    fn probe(&self) -> Result<Vec<f32>, ProviderError> {
        self.embed_one(PROBE_TEXT)
    }
}

/// Completion provider: a plain one-shot completion for answers, and a
/// schema-constrained call whose JSON the caller validates.
pub trait LlmProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    fn parse_structured(
        &self,
        schema_name: &str,
        schema: &serde_json::Value,
        messages: &[PromptMessage],
    ) -> Result<serde_json::Value, ProviderError>;
}
