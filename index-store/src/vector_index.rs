//! Persistent chunk-id → embedding index. All public operations take one
//! process-wide lock, follow the index file's mtime to pick up commits from
//! other processes, and persist through atomic rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use llm_provider::EmbeddingProvider;
use rag_model::SearchResult;

use crate::flat_index::{l2_normalize, FlatIpIndex};
use crate::{ChunkStore, IndexError, SearchFilters, VectorSearch};

const REBUILD_BATCH: usize = 256;
const SEARCH_K_FACTOR: usize = 5;
const MAX_K_FACTOR: usize = 50;

struct IndexState {
    index: FlatIpIndex,
    file_mtime: Option<SystemTime>,
}

pub struct VectorIndex {
    path: PathBuf,
    dimension: usize,
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    state: Mutex<IndexState>,
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl VectorIndex {
    /// Open (or create) the index at `path`. When `dimension` is `None` it
    /// is discovered by embedding the fixed probe string.
    pub fn open(
        path: impl Into<PathBuf>,
        dimension: Option<usize>,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let path = path.into();
        let dimension = match dimension {
            Some(d) => d,
            None => embedder.probe()?.len(),
        };
        if dimension == 0 {
            return Err(IndexError::Corrupt("probe returned an empty vector".into()));
        }

        let index = if path.exists() {
            let loaded = FlatIpIndex::load(&path)?;
            if loaded.dimension() != dimension {
                return Err(IndexError::DimensionMismatch {
                    file: loaded.dimension(),
                    expected: dimension,
                });
            }
            loaded
        } else {
            let empty = FlatIpIndex::new(dimension);
            empty.save(&path)?;
            empty
        };
        let file_mtime = file_mtime(&path);

        Ok(Self {
            path,
            dimension,
            store,
            embedder,
            state: Mutex::new(IndexState { index, file_mtime }),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of vectors currently live (after following the file).
    pub fn ntotal(&self) -> Result<usize, IndexError> {
        let mut state = self.lock()?;
        self.maybe_reload(&mut state);
        Ok(state.index.ntotal())
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexState>, IndexError> {
        self.state.lock().map_err(|_| IndexError::Poisoned)
    }

    /// Reload from disk when the file advanced past what we last saw. Any
    /// reload failure keeps the current index live; continuity beats
    /// freshness here.
    fn maybe_reload(&self, state: &mut IndexState) {
        let Some(current) = file_mtime(&self.path) else {
            return;
        };
        if let Some(last) = state.file_mtime {
            if current <= last {
                return;
            }
        }
        match FlatIpIndex::load(&self.path) {
            Ok(new_index) => {
                if new_index.dimension() != self.dimension {
                    tracing::error!(
                        file_dimension = new_index.dimension(),
                        expected = self.dimension,
                        path = %self.path.display(),
                        "index reload aborted on dimension mismatch, keeping existing index"
                    );
                    return;
                }
                tracing::warn!(
                    path = %self.path.display(),
                    ntotal = new_index.ntotal(),
                    "vector index reloaded"
                );
                state.index = new_index;
                state.file_mtime = Some(current);
            }
            Err(err) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %err,
                    "index reload failed, keeping existing index"
                );
            }
        }
    }

    fn save_locked(&self, state: &mut IndexState) -> Result<(), IndexError> {
        state.index.save(&self.path)?;
        state.file_mtime = file_mtime(&self.path);
        Ok(())
    }

    fn embed_normalized(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = self.embedder.embed_many(texts)?;
        for v in vectors.iter_mut() {
            if v.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    file: v.len(),
                    expected: self.dimension,
                });
            }
            l2_normalize(v);
        }
        Ok(vectors)
    }

    /// Upsert the given chunk ids: re-fetch content, re-embed, replace any
    /// prior vector, persist. Ids that no longer resolve are skipped.
    pub fn index_chunks(&self, chunk_ids: &[i64]) -> Result<(), IndexError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let chunks = self.store.chunks_by_ids(chunk_ids)?;
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_normalized(&texts)?;

        let mut state = self.lock()?;
        self.maybe_reload(&mut state);
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            state.index.add(chunk.id, vector)?;
        }
        self.save_locked(&mut state)
    }

    /// Remove ids from the index and persist. Missing ids are ignored.
    pub fn delete_chunks(&self, chunk_ids: &[i64]) -> Result<(), IndexError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        self.maybe_reload(&mut state);
        state.index.remove(chunk_ids);
        self.save_locked(&mut state)
    }

    /// Rebuild from the chunk store in id order. An empty store aborts
    /// without touching the file so a bad migration cannot wipe the index.
    pub fn rebuild_index(&self) -> Result<(), IndexError> {
        let total = self.store.count_chunks()?;
        tracing::warn!(chunk_count = total, "vector index rebuild start");
        if total == 0 {
            tracing::error!("vector index rebuild aborted: no chunks, skipping overwrite");
            return Ok(());
        }

        let mut new_index = FlatIpIndex::new(self.dimension);
        let mut offset = 0u64;
        loop {
            let batch = self.store.chunk_contents_ordered(offset, REBUILD_BATCH)?;
            if batch.is_empty() {
                break;
            }
            let texts: Vec<String> = batch.iter().map(|(_, content)| content.clone()).collect();
            let vectors = self.embed_normalized(&texts)?;
            for ((id, _), vector) in batch.iter().zip(vectors.iter()) {
                new_index.add(*id, vector)?;
            }
            offset += batch.len() as u64;
        }

        let mut state = self.lock()?;
        new_index.save(&self.path)?;
        state.index = new_index;
        state.file_mtime = file_mtime(&self.path);
        tracing::warn!(ntotal = state.index.ntotal(), "vector index rebuild finish");
        Ok(())
    }

    fn search_locked(
        &self,
        state: &mut IndexState,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if state.index.ntotal() == 0 || top_k == 0 {
            return Ok(Vec::new());
        }
        let mut q = query.to_vec();
        if q.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                file: q.len(),
                expected: self.dimension,
            });
        }
        l2_normalize(&mut q);

        let ntotal = state.index.ntotal();
        let max_k = ntotal.min(top_k * MAX_K_FACTOR);
        let mut search_k = max_k.min(top_k * SEARCH_K_FACTOR);

        loop {
            let raw = state.index.search(&q, search_k);
            let ids: Vec<i64> = raw.iter().map(|(id, _)| *id).collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let chunks = self.store.chunks_by_ids(&ids)?;
            let by_id: HashMap<i64, _> = chunks.iter().map(|c| (c.id, c)).collect();

            let mut results: Vec<SearchResult> = Vec::new();
            for (id, score) in &raw {
                // Ids can go stale between index commits; drop them here.
                let Some(chunk) = by_id.get(id) else { continue };
                if !filters.matches(&chunk.document) {
                    continue;
                }
                results.push(SearchResult {
                    chunk: (*chunk).clone(),
                    score: *score,
                });
                if results.len() >= top_k {
                    return Ok(results);
                }
            }

            if search_k >= max_k {
                return Ok(results);
            }
            search_k = max_k.min(search_k * 2);
        }
    }
}

impl VectorSearch for VectorIndex {
    /// Department-scoped top-k. The query is L2-normalised before search, so
    /// scores are cosine similarities in [-1, 1].
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let mut state = self.lock()?;
        self.maybe_reload(&mut state);
        self.search_locked(&mut state, query, top_k, filters)
    }
}
