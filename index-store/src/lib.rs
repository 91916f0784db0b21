//! Persistence and retrieval: the SQLite storage adapter behind explicit
//! store traits, and the vector index with atomic on-disk persistence,
//! cross-process reload and department-scoped search.

pub mod flat_index;
pub mod sqlite_repo;
pub mod vector_index;

use rag_model::{ChunkRef, DocumentRef, SearchResult};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("timestamp parse failed: {0}")]
    Timestamp(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index io failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("index file corrupt: {0}")]
    Corrupt(String),
    #[error("index dimension mismatch: file={file} expected={expected}")]
    DimensionMismatch { file: usize, expected: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("embedding failed: {0}")]
    Embed(#[from] llm_provider::ProviderError),
    #[error("index lock poisoned")]
    Poisoned,
}

/// Department constraint applied to a search. Either field may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub department_id: Option<i64>,
    pub department_code: Option<String>,
}

impl SearchFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_department_code(code: impl Into<String>) -> Self {
        Self {
            department_code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, document: &DocumentRef) -> bool {
        if let Some(id) = self.department_id {
            if document.department_id != id {
                return false;
            }
        }
        if let Some(code) = &self.department_code {
            if &document.department_code != code {
                return false;
            }
        }
        true
    }
}

/// Chunk access the vector index needs: counting, id-set resolution with the
/// owning document eager-loaded, and id-ordered batches for rebuilds.
pub trait ChunkStore: Send + Sync {
    fn count_chunks(&self) -> Result<u64, StoreError>;
    /// Resolve ids to chunks; ids that no longer exist are omitted.
    fn chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<ChunkRef>, StoreError>;
    /// `(id, content)` pairs ordered by id, for rebuild batching.
    fn chunk_contents_ordered(&self, offset: u64, limit: usize)
        -> Result<Vec<(i64, String)>, StoreError>;
}

/// Read-side seam of the vector index; the chat pipeline depends on this,
/// not on the concrete index.
pub trait VectorSearch: Send + Sync {
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, IndexError>;
}
