//! Secondary PDF engine: `pdf-extract` per-page text recovery. Slower than
//! the primary but handles more font encodings; used when quality checks on
//! the primary output fire.

use std::path::Path;

use crate::ExtractError;

pub const ENGINE: &str = "pdf-extract";

pub fn extract_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_by_pages(path).map_err(|e| ExtractError::Pdf(e.to_string()))
}
