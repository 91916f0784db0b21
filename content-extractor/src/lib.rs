//! File-to-text extraction: dispatch by extension, PDF dual-engine with
//! quality scoring, encoding-aware text/CSV decoding, and the character
//! splitters used by ingestion.

pub mod engine_lopdf;
pub mod engine_pdf_extract;
pub mod quality;
pub mod reader_csv;
pub mod reader_pdf;
pub mod reader_text;
pub mod splitter;

use std::path::Path;

use serde::Serialize;

/// Named quality warnings attached to extraction results.
pub mod warnings {
    pub const LOW_TEXT_VOLUME: &str = "low_text_volume";
    pub const NO_TEXT_EXTRACTED: &str = "no_text_extracted";
    pub const REPLACEMENT_CHARACTERS_MANY: &str = "replacement_characters_many";
    pub const IMAGE_PDF_SUSPECTED: &str = "image_pdf_suspected";
    pub const MOJIBAKE_SUSPECTED: &str = "mojibake_suspected";
    pub const ADVANCED_ENCODING_UNIMPLEMENTED: &str = "advanced_encoding_unimplemented";
    pub const DECODE_ERRORS_REPLACED: &str = "decode_errors_replaced";
    pub const CSV_DIALECT_SNIFF_FAILED: &str = "csv_dialect_sniff_failed";
    pub const CSV_INCONSISTENT_COLUMNS: &str = "csv_inconsistent_columns";
    pub const CSV_EMPTY: &str = "csv_empty";
}

/// Default number of CSV body rows grouped into one chunk.
pub const DEFAULT_CSV_ROWS_PER_CHUNK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Text,
    Csv,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Text => "text",
            SourceKind::Csv => "csv",
        }
    }
}

/// How the dual-engine PDF comparison went and which side was kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackReport {
    pub attempted: bool,
    pub chosen: String,
    pub reason: String,
    pub primary_chars: usize,
    pub secondary_chars: usize,
    pub primary_replacement_ratio: f32,
    pub secondary_replacement_ratio: f32,
    pub primary_warnings: Vec<String>,
    pub secondary_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_error: Option<String>,
}

/// Extraction metadata: the engine used, quality warnings, and per-format
/// details (encoding, CSV dialect, fallback comparison).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractMeta {
    pub kind: SourceKind,
    pub engine: String,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_header: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_per_chunk_hint: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReport>,
}

impl ExtractMeta {
    pub fn new(kind: SourceKind, engine: impl Into<String>) -> Self {
        Self {
            kind,
            engine: engine.into(),
            warnings: Vec::new(),
            encoding: None,
            delimiter: None,
            csv_header: None,
            rows_per_chunk_hint: None,
            fallback: None,
        }
    }

    pub fn has_warning(&self, name: &str) -> bool {
        self.warnings.iter().any(|w| w == name)
    }
}

/// Result of extracting one file. `pages` is present for page-oriented
/// sources (PDF); `full_text` is always populated (possibly empty).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub full_text: String,
    pub pages: Option<Vec<String>>,
    pub num_pages: Option<u32>,
    pub meta: ExtractMeta,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: .{extension}")]
    UnsupportedFileType { extension: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pdf parse failed: {0}")]
    Pdf(String),
}

/// Extract a file, dispatching on its extension.
/// `.pdf` → dual-engine PDF, `.txt`/`.md`/`.markdown` → text, `.csv` → CSV.
pub fn extract_path(path: &Path) -> Result<ExtractedContent, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => reader_pdf::extract_pdf(path),
        "txt" | "md" | "markdown" => reader_text::extract_text(path),
        "csv" => reader_csv::extract_csv(path),
        _ => Err(ExtractError::UnsupportedFileType { extension: ext }),
    }
}
