//! Document lifecycle: upload, delete, reindex one, reindex all. Every
//! mutating operation ends in exactly one audit row; upload failures roll
//! back the half-created document and blob best-effort before the FAILED
//! row is written.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use index_store::sqlite_repo::{NewAuditLog, SqliteRepo};
use index_store::vector_index::VectorIndex;
use index_store::{IndexError, StoreError};
use rag_model::{AuditAction, AuditStatus, Department, Document};
use serde_json::json;

use crate::blob_store::{BlobError, BlobStore};
use crate::ingestion::{IngestResult, IngestionError, IngestionService};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

fn file_ext(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub struct DocumentService {
    repo: Arc<SqliteRepo>,
    blob: Arc<dyn BlobStore>,
    ingestion: Arc<IngestionService>,
    index: Arc<VectorIndex>,
}

impl DocumentService {
    pub fn new(
        repo: Arc<SqliteRepo>,
        blob: Arc<dyn BlobStore>,
        ingestion: Arc<IngestionService>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            repo,
            blob,
            ingestion,
            index,
        }
    }

    /// Save the file, create the document row, ingest, index, audit.
    /// On failure the document row and blob are removed best-effort and one
    /// FAILED row records what happened.
    pub fn upload(
        &self,
        actor_id: Option<i64>,
        file_name: &str,
        bytes: &[u8],
        department: &Department,
    ) -> Result<Document, ServiceError> {
        let mut stored_path: Option<String> = None;
        let mut document: Option<Document> = None;

        let outcome = (|| -> Result<(Document, IngestResult), ServiceError> {
            let relative = format!("documents/{}/{}", department.code, file_name);
            let path = self.blob.save(&relative, bytes)?;
            stored_path = Some(path.clone());
            let doc = self
                .repo
                .create_document(file_name, &path, department.id, actor_id)?;
            document = Some(doc.clone());
            let ingest = self.ingestion.ingest_document(&doc)?;
            self.index.index_chunks(&ingest.chunk_ids)?;
            Ok((doc, ingest))
        })();

        match outcome {
            Ok((doc, ingest)) => {
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Upload,
                    status: AuditStatus::Success,
                    actor_id,
                    document_id: Some(doc.id),
                    department_id: Some(department.id),
                    message: "アップロード時に即インジェスト・即インデックス".into(),
                    meta: json!({
                        "file_path": doc.file_path,
                        "file_ext": file_ext(&doc.file_path),
                        "chunk_count": ingest.chunk_count,
                        "extract_engine": ingest.engine,
                        "extract_warnings": ingest.warnings,
                        "extract_meta": ingest.extractor_meta,
                    }),
                })?;
                // Re-read so num_pages set during ingestion is visible.
                Ok(self
                    .repo
                    .document_by_id(doc.id)?
                    .unwrap_or(doc))
            }
            Err(err) => {
                if let Some(doc) = &document {
                    if let Err(cleanup) = self.repo.delete_document(doc.id) {
                        tracing::warn!(document_id = doc.id, error = %cleanup,
                            "failed to remove half-created document");
                    }
                }
                if let Some(path) = &stored_path {
                    if let Err(cleanup) = self.blob.delete(path) {
                        tracing::warn!(path = %path, error = %cleanup,
                            "failed to remove uploaded blob");
                    }
                }
                let extract_meta = match &err {
                    ServiceError::Ingestion(ingestion) => ingestion
                        .extract_meta()
                        .map(|m| serde_json::to_value(m).unwrap_or_default()),
                    _ => None,
                };
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Upload,
                    status: AuditStatus::Failed,
                    actor_id,
                    document_id: None,
                    department_id: Some(department.id),
                    message: "アップロード処理失敗".into(),
                    meta: json!({
                        "filename": file_name,
                        "file_ext": file_ext(file_name),
                        "error": err.to_string(),
                        "extract_meta": extract_meta,
                    }),
                })?;
                Err(err)
            }
        }
    }

    /// Remove the document's vectors, blob and row (chunks cascade).
    pub fn delete(&self, actor_id: Option<i64>, document: &Document) -> Result<(), ServiceError> {
        let snapshot = json!({
            "document_id": document.id,
            "title": document.title,
            "file_path": document.file_path,
            "department_id": document.department_id,
        });

        let outcome = (|| -> Result<(), ServiceError> {
            let chunk_ids = self.repo.chunk_ids_for_document(document.id)?;
            if !chunk_ids.is_empty() {
                self.index.delete_chunks(&chunk_ids)?;
            }
            if !document.file_path.is_empty() {
                self.blob.delete(&document.file_path)?;
            }
            self.repo.delete_document(document.id)?;
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Delete,
                    status: AuditStatus::Success,
                    actor_id,
                    document_id: None,
                    department_id: Some(document.department_id),
                    message: "ドキュメント削除".into(),
                    meta: snapshot,
                })?;
                Ok(())
            }
            Err(err) => {
                let mut meta = snapshot;
                meta["error"] = json!(err.to_string());
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Delete,
                    status: AuditStatus::Failed,
                    actor_id,
                    document_id: Some(document.id),
                    department_id: Some(document.department_id),
                    message: "ドキュメント削除失敗".into(),
                    meta,
                })?;
                Err(err)
            }
        }
    }

    /// Re-ingest one document and refresh its vectors.
    pub fn reindex(
        &self,
        actor_id: Option<i64>,
        document: &Document,
    ) -> Result<IngestResult, ServiceError> {
        let outcome = (|| -> Result<IngestResult, ServiceError> {
            let old_ids = self.repo.chunk_ids_for_document(document.id)?;
            let result = self.ingestion.ingest_document(document)?;
            if !old_ids.is_empty() {
                self.index.delete_chunks(&old_ids)?;
            }
            self.index.index_chunks(&result.chunk_ids)?;
            Ok(result)
        })();

        match outcome {
            Ok(result) => {
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Reindex,
                    status: AuditStatus::Success,
                    actor_id,
                    document_id: Some(document.id),
                    department_id: Some(document.department_id),
                    message: "ドキュメント再インデックス".into(),
                    meta: json!({
                        "chunk_count": result.chunk_count,
                        "extract_engine": result.engine,
                        "extract_warnings": result.warnings,
                    }),
                })?;
                Ok(result)
            }
            Err(err) => {
                self.repo.append_audit(NewAuditLog {
                    action: AuditAction::Reindex,
                    status: AuditStatus::Failed,
                    actor_id,
                    document_id: Some(document.id),
                    department_id: Some(document.department_id),
                    message: "ドキュメント再インデックス失敗".into(),
                    meta: json!({ "error": err.to_string() }),
                })?;
                Err(err)
            }
        }
    }

    /// Re-ingest every document, then rebuild the index once. Per-document
    /// failures are tallied (list capped at 50) instead of aborting the run.
    pub fn reindex_all(&self, actor_id: Option<i64>) -> Result<serde_json::Value, ServiceError> {
        let total = self.repo.count_documents()?;
        let mut success = 0u64;
        let mut failed = 0u64;
        let mut failures: Vec<serde_json::Value> = Vec::new();
        let mut engine_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut warning_counts: BTreeMap<String, u64> = BTreeMap::new();

        for doc in self.repo.list_documents()? {
            match self.ingestion.ingest_document(&doc) {
                Ok(result) => {
                    success += 1;
                    *engine_counts.entry(result.engine).or_default() += 1;
                    for w in result.warnings {
                        *warning_counts.entry(w).or_default() += 1;
                    }
                }
                Err(err) => {
                    failed += 1;
                    failures.push(json!({
                        "document_id": doc.id,
                        "title": doc.title,
                        "error": err.to_string(),
                    }));
                }
            }
        }

        failures.truncate(50);
        let mut meta = json!({
            "scope": "all",
            "total_documents": total,
            "success_documents": success,
            "failed_documents": failed,
            "failures": failures,
            "engine_counts": engine_counts,
            "warning_counts": warning_counts,
        });

        let rebuild = self.index.rebuild_index();
        if let Err(err) = &rebuild {
            meta["rebuild_error"] = json!(err.to_string());
        }
        let status = if failed == 0 && rebuild.is_ok() {
            AuditStatus::Success
        } else {
            AuditStatus::Failed
        };
        self.repo.append_audit(NewAuditLog {
            action: AuditAction::ReindexAll,
            status,
            actor_id,
            document_id: None,
            department_id: None,
            message: "全件洗い替え（全件再インデックス）を実行".into(),
            meta: meta.clone(),
        })?;
        rebuild?;
        Ok(meta)
    }
}
