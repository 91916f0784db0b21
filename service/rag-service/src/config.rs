use std::path::PathBuf;

use llm_provider::config::OPENAI_DEFAULTS;

/// Service-wide configuration with the shared defaults.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub media_root: PathBuf,
    pub embedding_model: String,
    pub llm_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub score_threshold: f32,
    pub top_k: usize,
    pub history_limit: usize,
    pub context_char_budget: usize,
    pub per_message_snippet: usize,
    pub recent_message_display: usize,
    pub csv_rows_per_chunk: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("var/ragdesk.db"),
            index_path: PathBuf::from("var/index/chunks.index"),
            media_root: PathBuf::from("var/media"),
            embedding_model: OPENAI_DEFAULTS.embedding_model.to_string(),
            llm_model: OPENAI_DEFAULTS.completion_model.to_string(),
            chunk_size: 300,
            chunk_overlap: 80,
            score_threshold: 0.55,
            top_k: 5,
            history_limit: 20,
            context_char_budget: 1000,
            per_message_snippet: 200,
            recent_message_display: 30,
            csv_rows_per_chunk: 20,
        }
    }
}
