//! One chat turn end to end: route, short-circuit on clarification or
//! non-business turns, embed, search with scoped fallback, gate on weak
//! retrieval, then build the prompt and ask the LLM.

use std::sync::Arc;

use index_store::sqlite_repo::SqliteRepo;
use index_store::{IndexError, SearchFilters, StoreError, VectorSearch};
use llm_provider::{EmbeddingProvider, LlmProvider, ProviderError};
use rag_model::{
    build_citations, ChatMessage, ChatRole, ChatSession, Citation, RoutingDecision, SearchResult,
    UNKNOWN_DEPARTMENT,
};
use serde::Serialize;

use crate::config::RagConfig;
use crate::routing::Router;

pub const NOT_BUSINESS_MESSAGE: &str =
    "本件は社内業務に関する問い合わせではない可能性が高いです。業務に関する内容であれば目的や対象手続きを具体的に教えてください。";
pub const SEARCH_WEAK_MESSAGE: &str =
    "関連資料を特定できませんでした。対象の制度・手続き名（または担当部署の心当たり）を教えてください。";

pub const REASON_NEEDS_CLARIFICATION: &str = "needs_clarification";
pub const REASON_NOT_BUSINESS: &str = "not_business";
pub const REASON_SEARCH_WEAK: &str = "search_weak";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("query embedding failed: {0}")]
    Embedding(ProviderError),
    #[error("answer generation failed: {0}")]
    Completion(ProviderError),
}

/// How retrieval went for one turn; persisted on the assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalMeta {
    pub engine: &'static str,
    pub scope_used: String,
    pub fallback_triggered: bool,
    pub top_score: Option<f32>,
    pub hit_count: usize,
    pub k: usize,
    pub score_threshold: f32,
}

/// Everything a turn reports besides the answer text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub used_document_ids: Vec<i64>,
    pub num_context_chunks: usize,
    pub citations: Vec<Citation>,
}

pub struct RagChatService {
    repo: Arc<SqliteRepo>,
    search: Arc<dyn VectorSearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    router: Arc<dyn Router>,
    config: RagConfig,
}

impl RagChatService {
    pub fn new(
        repo: Arc<SqliteRepo>,
        search: Arc<dyn VectorSearch>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        router: Arc<dyn Router>,
        config: RagConfig,
    ) -> Self {
        Self {
            repo,
            search,
            embedder,
            llm,
            router,
            config,
        }
    }

    /// Run one user turn and produce `(answer, meta)`. The caller persists
    /// the messages; this method only reads history.
    pub fn chat(
        &self,
        session: &ChatSession,
        user_text: &str,
    ) -> Result<(String, ChatMeta), ChatError> {
        let dept_codes = self.repo.list_department_codes()?;
        let history = self
            .repo
            .recent_dialogue(session.id, self.config.history_limit)?;
        let session_context = self.build_session_context(&history);

        let decision = self.router.route(
            user_text,
            &dept_codes,
            if session_context.is_empty() {
                None
            } else {
                Some(session_context.as_str())
            },
        );

        if decision.needs_clarification {
            let question = decision.clarifying_question.clone();
            return Ok((
                question,
                ChatMeta {
                    routing: Some(decision),
                    reason: Some(REASON_NEEDS_CLARIFICATION),
                    ..ChatMeta::default()
                },
            ));
        }

        if !decision.is_business {
            return Ok((
                NOT_BUSINESS_MESSAGE.to_string(),
                ChatMeta {
                    routing: Some(decision),
                    reason: Some(REASON_NOT_BUSINESS),
                    ..ChatMeta::default()
                },
            ));
        }

        let query = self
            .embedder
            .embed_one(user_text)
            .map_err(ChatError::Embedding)?;

        let (results, retrieval) = self.search_with_fallback(&query, &decision)?;

        let search_weak = retrieval.top_score.is_none()
            || retrieval.hit_count == 0
            || retrieval.top_score.unwrap_or(0.0) < retrieval.score_threshold;
        if search_weak {
            return Ok((
                SEARCH_WEAK_MESSAGE.to_string(),
                ChatMeta {
                    routing: Some(decision),
                    retrieval: Some(retrieval),
                    reason: Some(REASON_SEARCH_WEAK),
                    ..ChatMeta::default()
                },
            ));
        }

        let mut context_texts: Vec<&str> = Vec::new();
        let mut used_document_ids: Vec<i64> = Vec::new();
        for result in &results {
            context_texts.push(result.chunk.content.as_str());
            if !used_document_ids.contains(&result.chunk.document_id) {
                used_document_ids.push(result.chunk.document_id);
            }
        }
        let context_block = context_texts.join("\n\n");

        let system_prompt = select_system_prompt(&decision.primary_department);
        let prompt = build_prompt(&system_prompt, &history, &context_block, user_text);

        let answer = self.llm.complete(&prompt).map_err(ChatError::Completion)?;

        let citations = build_citations(&results);
        let meta = ChatMeta {
            routing: Some(decision),
            retrieval: Some(retrieval),
            reason: None,
            used_document_ids,
            num_context_chunks: results.len(),
            citations,
        };
        Ok((answer, meta))
    }

    /// Compact recent-history summary: newest-to-oldest, one
    /// `role: snippet` line each, prepended until the budget is hit.
    fn build_session_context(&self, history: &[ChatMessage]) -> String {
        let mut context = String::new();
        let mut used = 0usize;
        for message in history.iter().rev() {
            let snippet: String = message
                .content
                .chars()
                .take(self.config.per_message_snippet)
                .collect();
            let line = format!("{}: {snippet}\n", message.role.as_str());
            let line_chars = line.chars().count();
            if used + line_chars > self.config.context_char_budget {
                break;
            }
            context.insert_str(0, &line);
            used += line_chars;
        }
        context
    }

    /// Scoped search: primary scope, then secondaries, each accepted when
    /// its top score clears the threshold (inclusive). When none does, run
    /// one company-wide search and report the fallback.
    pub fn search_with_fallback(
        &self,
        query: &[f32],
        decision: &RoutingDecision,
    ) -> Result<(Vec<SearchResult>, RetrievalMeta), ChatError> {
        let threshold = self.config.score_threshold;
        let top_k = self.config.top_k;

        let mut scopes: Vec<&str> = Vec::new();
        if !decision.primary_department.is_empty()
            && decision.primary_department != UNKNOWN_DEPARTMENT
        {
            scopes.push(decision.primary_department.as_str());
        }
        for code in &decision.secondary_departments {
            if !code.is_empty()
                && code != UNKNOWN_DEPARTMENT
                && !scopes.contains(&code.as_str())
            {
                scopes.push(code.as_str());
            }
        }

        for scope in scopes {
            let results = self.search.search(
                query,
                top_k,
                &SearchFilters::for_department_code(scope),
            )?;
            let top_score = results.first().map(|r| r.score);
            if let Some(top) = top_score {
                if top >= threshold {
                    let meta = RetrievalMeta {
                        engine: "vector",
                        scope_used: scope.to_string(),
                        fallback_triggered: false,
                        top_score: Some(top),
                        hit_count: results.len(),
                        k: top_k,
                        score_threshold: threshold,
                    };
                    return Ok((results, meta));
                }
            }
        }

        let results = self.search.search(query, top_k, &SearchFilters::none())?;
        let meta = RetrievalMeta {
            engine: "vector",
            scope_used: "company".to_string(),
            fallback_triggered: true,
            top_score: results.first().map(|r| r.score),
            hit_count: results.len(),
            k: top_k,
            score_threshold: threshold,
        };
        Ok((results, meta))
    }
}

/// Department-specific persona on top of the shared grounding rules.
pub fn select_system_prompt(dept_code: &str) -> String {
    let base = "あなたは社内問合せ専用のアシスタントです。\
        以下の社内資料（検索で取得したコンテキスト）を根拠に、日本語で簡潔かつ丁寧に回答してください。\
        根拠が不足している場合は推測で断定せず、「手元の資料からは判断できません」と答えてください。";
    let role = match dept_code {
        "hr" => "あなたは人事総務の担当者です。",
        "finance" => "あなたは経理の担当者です。",
        "legal" => "あなたは法務の担当者です。",
        "it" => "あなたは情シスの担当者です。",
        _ => "あなたは総合窓口の担当者です。",
    };
    format!("{base}\n{role}")
}

/// Assemble the final prompt. The Question block ends the prompt so the
/// model's attention lands on it last.
pub fn build_prompt(
    system_prompt: &str,
    history: &[ChatMessage],
    context: &str,
    user_message: &str,
) -> String {
    let mut history_lines: Vec<String> = history
        .iter()
        .map(|msg| {
            let role = if msg.role == ChatRole::User {
                "User"
            } else {
                "Assistant"
            };
            format!("{role}: {}", msg.content)
        })
        .collect();
    let last_is_current_user = history
        .last()
        .map(|m| m.role == ChatRole::User && m.content == user_message)
        .unwrap_or(false);
    if !last_is_current_user {
        history_lines.push(format!("User: {user_message}"));
    }
    let history_block = history_lines.join("\n");

    format!(
        "[system]\n{system_prompt}\n\n\
         [Conversation history]\n{history_block}\n\n\
         [Retrieved context]\n{context}\n\n\
         [Instruction]\n\
         - 必ず「Question」に対しての回答をしてください。\n\
         - 根拠は「Retrieved context」と「Conversation history」のみです。\n\
         - 根拠が不足して断定できない場合は「手元の資料からは判断できません」と答えてください。\n\
         - 推測で事実を作らないでください。\n\n\
         [Question]\n{user_message}"
    )
}
