//! Primary PDF engine: `lopdf` per-page text extraction. Fast, but trips on
//! exotic font encodings; those pages come back empty with the encoding
//! failure recorded so the caller can try the secondary engine.

use std::path::Path;

use lopdf::Document;

use crate::ExtractError;

pub const ENGINE: &str = "lopdf";

#[derive(Debug, Clone)]
pub struct EnginePages {
    pub pages: Vec<String>,
    /// Any page failed with an unhandled font/encoding.
    pub encoding_unimplemented: bool,
}

pub fn extract_pages(path: &Path) -> Result<EnginePages, ExtractError> {
    let doc = Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();

    let mut pages = Vec::with_capacity(page_numbers.len());
    let mut encoding_unimplemented = false;
    for page_no in page_numbers {
        match doc.extract_text(&[page_no]) {
            Ok(text) => pages.push(text),
            Err(err) => {
                tracing::debug!(page = page_no, error = %err, "lopdf page extraction failed");
                encoding_unimplemented = true;
                pages.push(String::new());
            }
        }
    }
    Ok(EnginePages {
        pages,
        encoding_unimplemented,
    })
}
