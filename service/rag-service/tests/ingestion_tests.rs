mod common;

use std::sync::Arc;

use common::CountingEmbedder;
use index_store::sqlite_repo::SqliteRepo;
use rag_model::Document;
use rag_service::{BlobStore, FsBlobStore, IngestionService, RagConfig};

struct Harness {
    repo: Arc<SqliteRepo>,
    blob: Arc<FsBlobStore>,
    service: IngestionService,
    dept_id: i64,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteRepo::open_in_memory().unwrap());
    let dept = repo.create_department("hr", "人事総務").unwrap();
    let blob = Arc::new(FsBlobStore::new(dir.path()));
    let service = IngestionService::new(
        repo.clone(),
        blob.clone(),
        Arc::new(CountingEmbedder::new(4)),
        RagConfig::default(),
    );
    Harness {
        repo,
        blob,
        service,
        dept_id: dept.id,
        _dir: dir,
    }
}

impl Harness {
    fn document_for(&self, name: &str, bytes: &[u8]) -> Document {
        let stored = self.blob.save(name, bytes).unwrap();
        self.repo
            .create_document(name, &stored, self.dept_id, None)
            .unwrap()
    }
}

#[test]
fn csv_rows_are_grouped_under_the_header_banner() {
    let h = harness();
    let mut csv = String::from("名前,部門\n");
    for i in 0..45 {
        csv.push_str(&format!("社員{i},hr\n"));
    }
    let doc = h.document_for("roster.csv", csv.as_bytes());

    let result = h.service.ingest_document(&doc).unwrap();
    assert_eq!(result.engine, "csv");
    // 45 rows at 20 per chunk.
    assert_eq!(result.chunk_count, 3);

    let chunks = h.repo.chunks_for_document(doc.id).unwrap();
    assert!(chunks.iter().all(|c| c.page.is_none()));
    assert!(chunks
        .iter()
        .all(|c| c.content.starts_with("CSVヘッダ: 名前, 部門\n")));
    assert!(chunks[0].content.contains("名前=社員0 / 部門=hr"));
    assert!(chunks[2].content.contains("名前=社員44 / 部門=hr"));
}

#[test]
fn markdown_text_is_split_without_pages() {
    let h = harness();
    let body = format!(
        "# 有給休暇\n{}\n\n# 慶弔休暇\n{}\n",
        "有給休暇は入社6ヶ月経過後に付与されます。申請は人事部まで。".repeat(8),
        "慶弔休暇は事由発生から速やかに申請してください。".repeat(8),
    );
    let doc = h.document_for("leave.md", body.as_bytes());

    let result = h.service.ingest_document(&doc).unwrap();
    assert!(result.chunk_count > 1);
    assert_eq!(result.engine, "text");

    let chunks = h.repo.chunks_for_document(doc.id).unwrap();
    let indexes: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indexes, (0..chunks.len() as u32).collect::<Vec<_>>());
    assert!(chunks.iter().all(|c| c.page.is_none()));
    assert!(chunks.iter().all(|c| c.embedding.as_ref().unwrap().len() == 4));
}

#[test]
fn cp932_text_is_decoded_before_splitting() {
    let h = harness();
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode("有給休暇の申請手順を説明します。");
    let doc = h.document_for("sjis.txt", &encoded);

    let result = h.service.ingest_document(&doc).unwrap();
    assert_eq!(result.chunk_count, 1);
    assert_eq!(
        result.extractor_meta.encoding.as_deref(),
        Some("cp932")
    );
    let chunks = h.repo.chunks_for_document(doc.id).unwrap();
    assert!(chunks[0].content.contains("有給休暇"));
}
