//! OpenAI-compatible HTTP providers over a blocking `ureq` agent.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::{OpenAiConfig, OPENAI_DEFAULTS};
use crate::{EmbeddingProvider, LlmProvider, PromptMessage, ProviderError};

const MAX_RETRIES: usize = 3;

fn is_retryable_status(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(60))
        .timeout_write(Duration::from_secs(60))
        .build()
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn first_choice_content(response: ChatResponse) -> Result<String, ProviderError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(content)
}

/// Embeddings via `POST /embeddings`, batched and retried.
pub struct OpenAiEmbeddingProvider {
    config: OpenAiConfig,
    agent: ureq::Agent,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            agent: build_agent(),
        }
    }

    fn post_with_retry(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ureq::Response, ProviderError> {
        post_with_retry(&self.agent, &self.config.api_key, &self.config.base_url, path, body)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self.post_with_retry(
            "/embeddings",
            json!({
                "model": self.config.embedding_model,
                "input": texts,
            }),
        )?;
        let parsed: EmbeddingResponse = response
            .into_json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Decode(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors.pop().ok_or(ProviderError::EmptyResponse)
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OPENAI_DEFAULTS.embed_batch) {
            out.extend(self.embed_batch(batch)?);
        }
        Ok(out)
    }
}

/// Completions via `POST /chat/completions`; plain answers at the answer
/// temperature, structured parses schema-constrained at temperature 0.
pub struct OpenAiLlmProvider {
    config: OpenAiConfig,
    agent: ureq::Agent,
}

impl OpenAiLlmProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            agent: build_agent(),
        }
    }

    fn post_with_retry(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ureq::Response, ProviderError> {
        post_with_retry(&self.agent, &self.config.api_key, &self.config.base_url, path, body)
    }
}

impl LlmProvider for OpenAiLlmProvider {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self.post_with_retry(
            "/chat/completions",
            json!({
                "model": self.config.completion_model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": self.config.answer_temperature,
            }),
        )?;
        let parsed: ChatResponse = response
            .into_json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        first_choice_content(parsed)
    }

    fn parse_structured(
        &self,
        schema_name: &str,
        schema: &serde_json::Value,
        messages: &[PromptMessage],
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self.post_with_retry(
            "/chat/completions",
            json!({
                "model": self.config.completion_model,
                "messages": messages,
                "temperature": self.config.routing_temperature,
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema_name,
                        "strict": true,
                        "schema": schema,
                    },
                },
            }),
        )?;
        let parsed: ChatResponse = response
            .into_json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = first_choice_content(parsed)?;
        serde_json::from_str(&content).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

fn post_with_retry(
    agent: &ureq::Agent,
    api_key: &str,
    base_url: &str,
    path: &str,
    body: serde_json::Value,
) -> Result<ureq::Response, ProviderError> {
    let url = format!("{base_url}{path}");
    let mut attempt = 0usize;
    loop {
        let result = agent
            .post(&url)
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Content-Type", "application/json")
            .send_json(body.clone());

        match result {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(code, response))
                if is_retryable_status(code) && attempt < MAX_RETRIES =>
            {
                let body = response.into_string().unwrap_or_default();
                tracing::warn!(attempt = attempt + 1, status = code, body = %body,
                    "retrying provider request after server status");
            }
            Err(err @ ureq::Error::Transport(_)) if attempt < MAX_RETRIES => {
                tracing::warn!(attempt = attempt + 1, error = %err,
                    "retrying provider request after transport error");
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ProviderError::Status { status: code, body });
            }
            Err(err) => return Err(ProviderError::Transport(err.to_string())),
        }

        thread::sleep(Duration::from_millis(200u64.saturating_mul(1 << attempt)));
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_items_sort_by_index() {
        let raw = r#"{"data":[
            {"index":1,"embedding":[0.5,0.5]},
            {"index":0,"embedding":[1.0,0.0]}
        ]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|i| i.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn chat_content_is_trimmed() {
        let raw = r#"{"choices":[{"message":{"content":"  答えです  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(first_choice_content(parsed).unwrap(), "答えです");
    }

    #[test]
    fn missing_content_is_an_empty_response() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            first_choice_content(parsed),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }
}
