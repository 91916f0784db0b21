//! Shared domain models used across crates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Department a document belongs to. `code` is the business key
/// (lowercase alphanumerics plus underscore, unique).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// True when `code` is a legal department code.
pub fn is_valid_department_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// An uploaded source document. `file_path` is opaque to the core and is
/// resolved through the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub num_pages: Option<u32>,
    pub department_id: i64,
    pub uploaded_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A contiguous text span extracted from a document, the unit of retrieval.
/// `chunk_index` is 0-based and dense per document; `page` is 1-based when
/// the source has pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// Row to insert for a new chunk; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Document fields a search result needs without loading the full row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i64,
    pub title: String,
    pub department_id: i64,
    pub department_code: String,
}

/// Chunk with its owning document eager-loaded, as returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub content: String,
    pub document: DocumentRef,
}

/// One scored retrieval hit. Scores are inner products of L2-normalised
/// vectors, i.e. cosine similarities in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: ChunkRef,
    pub score: f32,
}

/// Audit actions for mutating document operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Upload,
    Delete,
    Reindex,
    ReindexAll,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Upload => "UPLOAD",
            AuditAction::Delete => "DELETE",
            AuditAction::Reindex => "REINDEX",
            AuditAction::ReindexAll => "REINDEX_ALL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOAD" => Some(AuditAction::Upload),
            "DELETE" => Some(AuditAction::Delete),
            "REINDEX" => Some(AuditAction::Reindex),
            "REINDEX_ALL" => Some(AuditAction::ReindexAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(AuditStatus::Success),
            "FAILED" => Some(AuditStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit record; one terminal row per mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub action: AuditAction,
    pub status: AuditStatus,
    pub actor_id: Option<i64>,
    pub document_id: Option<i64>,
    pub department_id: Option<i64>,
    pub message: String,
    pub meta: serde_json::Value,
}

/// A chat session is open while `ended_at` is null. `answer_department_id`
/// remembers the last department a turn was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: Option<i64>,
    pub answer_department_id: Option<i64>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(ChatRole::System),
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

/// One message in a session. Routing meta lives on the user turn; retrieval
/// meta and citations live on the assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub routing_meta: Option<serde_json::Value>,
    pub retrieval_meta: Option<serde_json::Value>,
    pub citations: Vec<Citation>,
}

/// Department code used when the classifier cannot name one.
pub const UNKNOWN_DEPARTMENT: &str = "unknown";

/// Structured classification of one user turn: business or not, which
/// department, and whether a clarifying question is needed first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub is_business: bool,
    pub business_confidence: f32,
    pub primary_department: String,
    pub department_confidence: f32,
    #[serde(default)]
    pub secondary_departments: Vec<String>,
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifying_question: String,
}

impl RoutingDecision {
    /// Safe default used when classification cannot be trusted: treat the
    /// turn as business and ask the given clarifying question.
    pub fn safe_default(clarifying_question: impl Into<String>) -> Self {
        Self {
            is_business: true,
            business_confidence: 0.0,
            primary_department: UNKNOWN_DEPARTMENT.to_string(),
            department_confidence: 0.0,
            secondary_departments: Vec::new(),
            needs_clarification: true,
            clarifying_question: clarifying_question.into(),
        }
    }
}

/// Where inside a document the grounding text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Locator {
    /// 1-based page numbers, sorted and unique.
    #[serde(rename = "page_set")]
    PageSet { pages: Vec<u32> },
    /// 1-based chunk ordinals, sorted and unique.
    #[serde(rename = "chunk_set")]
    ChunkSet { chunks: Vec<u32> },
}

/// Per-document locator reported with an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: i64,
    pub title: String,
    pub locator: Locator,
}

/// Aggregate retrieval hits into per-document citations, sorted by
/// `(title, document_id)`. Pages win over chunk ordinals when any hit for
/// the document carries a page.
pub fn build_citations(results: &[SearchResult]) -> Vec<Citation> {
    struct Acc {
        title: String,
        pages: BTreeSet<u32>,
        chunks: BTreeSet<u32>,
    }

    let mut by_doc: Vec<(i64, Acc)> = Vec::new();
    for r in results {
        let doc_id = r.chunk.document_id;
        let at = match by_doc.iter().position(|(id, _)| *id == doc_id) {
            Some(at) => at,
            None => {
                by_doc.push((
                    doc_id,
                    Acc {
                        title: r.chunk.document.title.clone(),
                        pages: BTreeSet::new(),
                        chunks: BTreeSet::new(),
                    },
                ));
                by_doc.len() - 1
            }
        };
        let acc = &mut by_doc[at].1;
        match r.chunk.page {
            Some(p) => {
                acc.pages.insert(p);
            }
            // Stored chunk_index is 0-based; display is 1-based.
            None => {
                acc.chunks.insert(r.chunk.chunk_index + 1);
            }
        }
    }

    let mut citations: Vec<Citation> = by_doc
        .into_iter()
        .map(|(document_id, acc)| {
            let locator = if !acc.pages.is_empty() {
                Locator::PageSet {
                    pages: acc.pages.into_iter().collect(),
                }
            } else {
                Locator::ChunkSet {
                    chunks: acc.chunks.into_iter().collect(),
                }
            };
            Citation {
                document_id,
                title: acc.title,
                locator,
            }
        })
        .collect();
    citations.sort_by(|a, b| (&a.title, a.document_id).cmp(&(&b.title, b.document_id)));
    citations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc_id: i64, title: &str, chunk_index: u32, page: Option<u32>) -> SearchResult {
        SearchResult {
            chunk: ChunkRef {
                id: doc_id * 100 + chunk_index as i64,
                document_id: doc_id,
                chunk_index,
                page,
                content: "x".into(),
                document: DocumentRef {
                    id: doc_id,
                    title: title.into(),
                    department_id: 1,
                    department_code: "hr".into(),
                },
            },
            score: 0.9,
        }
    }

    #[test]
    fn citations_aggregate_pages_per_document() {
        let results = vec![
            hit(1, "規程A", 0, Some(3)),
            hit(1, "規程A", 1, Some(1)),
            hit(1, "規程A", 2, Some(3)),
        ];
        let cites = build_citations(&results);
        assert_eq!(cites.len(), 1);
        assert_eq!(
            cites[0].locator,
            Locator::PageSet { pages: vec![1, 3] }
        );
    }

    #[test]
    fn citations_fall_back_to_one_based_chunk_ordinals() {
        let results = vec![hit(2, "FAQ", 0, None), hit(2, "FAQ", 4, None)];
        let cites = build_citations(&results);
        assert_eq!(
            cites[0].locator,
            Locator::ChunkSet { chunks: vec![1, 5] }
        );
    }

    #[test]
    fn citations_sort_by_title_then_id() {
        let results = vec![
            hit(9, "b-doc", 0, Some(1)),
            hit(3, "a-doc", 0, Some(1)),
            hit(5, "a-doc", 0, Some(1)),
        ];
        let ids: Vec<i64> = build_citations(&results)
            .into_iter()
            .map(|c| c.document_id)
            .collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn department_code_validation() {
        assert!(is_valid_department_code("hr"));
        assert!(is_valid_department_code("sales_2"));
        assert!(!is_valid_department_code(""));
        assert!(!is_valid_department_code("HR"));
        assert!(!is_valid_department_code("経理"));
    }
}
