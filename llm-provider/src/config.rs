use std::env;

use crate::ProviderError;

/// Default settings for the OpenAI-compatible providers.
#[derive(Debug, Clone, Copy)]
pub struct OpenAiDefaults {
    pub base_url: &'static str,
    pub embedding_model: &'static str,
    pub completion_model: &'static str,
    pub answer_temperature: f32,
    pub routing_temperature: f32,
    pub embed_batch: usize,
}

/// Shared defaults so the CLI, services and tests stay in sync.
pub const OPENAI_DEFAULTS: OpenAiDefaults = OpenAiDefaults {
    base_url: "https://api.openai.com/v1",
    embedding_model: "text-embedding-3-small",
    completion_model: "gpt-4.1-nano",
    answer_temperature: 0.2,
    routing_temperature: 0.0,
    embed_batch: 64,
};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub answer_temperature: f32,
    pub routing_temperature: f32,
}

impl OpenAiConfig {
    /// Build a config from `OPENAI_API_KEY` (required) and
    /// `OPENAI_BASE_URL` (optional), with the shared model defaults.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::InvalidConfiguration("OPENAI_API_KEY is not set".into())
        })?;
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| OPENAI_DEFAULTS.base_url.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            api_key,
            base_url,
            embedding_model: OPENAI_DEFAULTS.embedding_model.to_string(),
            completion_model: OPENAI_DEFAULTS.completion_model.to_string(),
            answer_temperature: OPENAI_DEFAULTS.answer_temperature,
            routing_temperature: OPENAI_DEFAULTS.routing_temperature,
        })
    }
}
