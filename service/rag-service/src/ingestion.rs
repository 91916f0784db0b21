//! Ingestion: extract a document's blob, split it into chunks, embed them in
//! one call, and swap them into the store atomically. Nothing is persisted
//! when any step fails.

use std::sync::Arc;

use content_extractor::splitter::{split_text, SplitParams};
use content_extractor::{extract_path, warnings, ExtractError, ExtractMeta, SourceKind};
use index_store::sqlite_repo::SqliteRepo;
use index_store::StoreError;
use llm_provider::{EmbeddingProvider, ProviderError};
use rag_model::{Document, NewChunk};

use crate::blob_store::{BlobError, BlobStore};
use crate::config::RagConfig;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("scan PDF / OCR not supported")]
    ScanPdf { meta: Box<ExtractMeta> },
    #[error("no chunks were produced from the document")]
    Empty,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("embedding failed: {0}")]
    Embed(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl IngestionError {
    /// Extraction metadata for the audit trail, when any was produced.
    pub fn extract_meta(&self) -> Option<&ExtractMeta> {
        match self {
            IngestionError::ScanPdf { meta } => Some(meta),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub chunk_count: usize,
    pub engine: String,
    pub warnings: Vec<String>,
    pub extractor_meta: ExtractMeta,
    pub num_pages: Option<u32>,
    pub chunk_ids: Vec<i64>,
}

/// A PDF whose chosen extraction is still textless is a scan; OCR is out of
/// scope, so it must be rejected instead of indexed as noise.
fn is_scan_pdf(meta: &ExtractMeta) -> bool {
    meta.kind == SourceKind::Pdf
        && (meta.has_warning(warnings::NO_TEXT_EXTRACTED)
            || meta.has_warning(warnings::IMAGE_PDF_SUSPECTED))
}

/// Group normalised CSV body lines into blocks, prefixing each block with
/// the header line when headers exist.
fn csv_blocks(full_text: &str, header: Option<&[String]>, rows_per_chunk: usize) -> Vec<String> {
    let rows: Vec<&str> = full_text.lines().filter(|l| !l.trim().is_empty()).collect();
    let prefix = header.filter(|h| !h.is_empty()).map(|h| {
        format!("CSVヘッダ: {}", h.join(", "))
    });
    rows.chunks(rows_per_chunk.max(1))
        .map(|block| {
            let body = block.join("\n");
            match &prefix {
                Some(p) => format!("{p}\n{body}"),
                None => body,
            }
        })
        .collect()
}

pub struct IngestionService {
    repo: Arc<SqliteRepo>,
    blob: Arc<dyn BlobStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RagConfig,
}

impl IngestionService {
    pub fn new(
        repo: Arc<SqliteRepo>,
        blob: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RagConfig,
    ) -> Self {
        Self {
            repo,
            blob,
            embedder,
            config,
        }
    }

    /// Extract, split, embed and persist one document's chunks, replacing
    /// whatever chunks it had. Returns the new chunk ids for indexing.
    pub fn ingest_document(&self, document: &Document) -> Result<IngestResult, IngestionError> {
        let fs_path = self.blob.resolve_fs_path(&document.file_path)?;
        let content = extract_path(&fs_path)?;

        if is_scan_pdf(&content.meta) {
            return Err(IngestionError::ScanPdf {
                meta: Box::new(content.meta),
            });
        }

        if let Some(num_pages) = content.num_pages {
            self.repo.set_document_num_pages(document.id, num_pages)?;
        }

        let pairs = self.split_to_pairs(&content.full_text, &content.pages, &content.meta);
        if pairs.is_empty() {
            return Err(IngestionError::Empty);
        }

        let texts: Vec<String> = pairs.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.embedder.embed_many(&texts)?;

        let rows: Vec<NewChunk> = pairs
            .into_iter()
            .zip(vectors.into_iter())
            .enumerate()
            .map(|(idx, ((page, text), embedding))| NewChunk {
                chunk_index: idx as u32,
                page,
                content: text,
                embedding,
            })
            .collect();
        let chunk_ids = self.repo.replace_document_chunks(document.id, &rows)?;

        Ok(IngestResult {
            chunk_count: chunk_ids.len(),
            engine: content.meta.engine.clone(),
            warnings: content.meta.warnings.clone(),
            extractor_meta: content.meta,
            num_pages: content.num_pages,
            chunk_ids,
        })
    }

    fn split_to_pairs(
        &self,
        full_text: &str,
        pages: &Option<Vec<String>>,
        meta: &ExtractMeta,
    ) -> Vec<(Option<u32>, String)> {
        let sizes = (self.config.chunk_size, self.config.chunk_overlap);

        if let Some(pages) = pages {
            let params = SplitParams::pdf().with_sizes(sizes.0, sizes.1);
            let mut pairs = Vec::new();
            for (idx, page_text) in pages.iter().enumerate() {
                if page_text.trim().is_empty() {
                    continue;
                }
                for chunk in split_text(page_text, &params) {
                    pairs.push((Some(idx as u32 + 1), chunk));
                }
            }
            return pairs;
        }

        match meta.kind {
            SourceKind::Csv => {
                let rows_per_chunk = meta
                    .rows_per_chunk_hint
                    .unwrap_or(self.config.csv_rows_per_chunk);
                csv_blocks(full_text, meta.csv_header.as_deref(), rows_per_chunk)
                    .into_iter()
                    .map(|block| (None, block))
                    .collect()
            }
            SourceKind::Text => {
                let params = SplitParams::text().with_sizes(sizes.0, sizes.1);
                split_text(full_text, &params)
                    .into_iter()
                    .map(|chunk| (None, chunk))
                    .collect()
            }
            SourceKind::Pdf => {
                let params = SplitParams::generic().with_sizes(sizes.0, sizes.1);
                split_text(full_text, &params)
                    .into_iter()
                    .map(|chunk| (None, chunk))
                    .collect()
            }
        }
    }
}
