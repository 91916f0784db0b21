//! Shared test doubles: deterministic embedder, scripted search backend,
//! scripted LLM and a fixed-decision router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use index_store::{IndexError, SearchFilters, VectorSearch};
use llm_provider::{EmbeddingProvider, LlmProvider, PromptMessage, ProviderError};
use rag_model::{ChunkRef, DocumentRef, RoutingDecision, SearchResult};
use rag_service::Router;

pub struct CountingEmbedder {
    pub dim: usize,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vec_for(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut h = hasher.finish();
        (0..self.dim)
            .map(|_| {
                h = h.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((h >> 33) as u32 % 1000) as f32 / 1000.0 + 0.001
            })
            .collect()
    }
}

impl EmbeddingProvider for CountingEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vec_for(text))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vec_for(t)).collect())
    }
}

/// Search stub keyed by department-code scope; `None` is the company-wide
/// search. Calls are recorded in order.
pub struct ScriptedSearch {
    pub by_scope: HashMap<Option<String>, Vec<SearchResult>>,
    pub calls: Mutex<Vec<Option<String>>>,
}

impl ScriptedSearch {
    pub fn new(entries: Vec<(Option<&str>, Vec<SearchResult>)>) -> Self {
        Self {
            by_scope: entries
                .into_iter()
                .map(|(scope, hits)| (scope.map(|s| s.to_string()), hits))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl VectorSearch for ScriptedSearch {
    fn search(
        &self,
        _query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let scope = filters.department_code.clone();
        self.calls.lock().unwrap().push(scope.clone());
        let mut hits = self.by_scope.get(&scope).cloned().unwrap_or_default();
        hits.truncate(top_k);
        Ok(hits)
    }
}

pub struct ScriptedLlm {
    pub answer: Result<String, String>,
    pub complete_calls: AtomicUsize,
    pub last_prompt: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            complete_calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            complete_calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for ScriptedLlm {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match &self.answer {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(ProviderError::Transport(message.clone())),
        }
    }

    fn parse_structured(
        &self,
        _schema_name: &str,
        _schema: &serde_json::Value,
        _messages: &[PromptMessage],
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::Transport("not scripted".into()))
    }
}

pub struct StubRouter(pub RoutingDecision);

impl Router for StubRouter {
    fn route(
        &self,
        _user_text: &str,
        _department_codes: &[String],
        _session_context: Option<&str>,
    ) -> RoutingDecision {
        self.0.clone()
    }
}

pub fn business_decision(primary: &str, secondary: &[&str]) -> RoutingDecision {
    RoutingDecision {
        is_business: true,
        business_confidence: 0.9,
        primary_department: primary.to_string(),
        department_confidence: 0.8,
        secondary_departments: secondary.iter().map(|s| s.to_string()).collect(),
        needs_clarification: false,
        clarifying_question: String::new(),
    }
}

pub fn hit(
    doc_id: i64,
    dept_code: &str,
    content: &str,
    score: f32,
    page: Option<u32>,
) -> SearchResult {
    SearchResult {
        chunk: ChunkRef {
            id: doc_id * 10,
            document_id: doc_id,
            chunk_index: 0,
            page,
            content: content.to_string(),
            document: DocumentRef {
                id: doc_id,
                title: format!("doc-{doc_id}"),
                department_id: 1,
                department_code: dept_code.to_string(),
            },
        },
        score,
    }
}
