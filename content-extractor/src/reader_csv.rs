//! CSV extraction: decode like text, sniff the delimiter on the first 4 KiB,
//! then emit one normalised `header=value / …` line per body row.

use std::path::Path;

use crate::reader_text::{decode_text_bytes, normalize_newlines};
use crate::{
    warnings, ExtractError, ExtractMeta, ExtractedContent, SourceKind, DEFAULT_CSV_ROWS_PER_CHUNK,
};

const SNIFF_WINDOW_BYTES: usize = 4096;
const DELIMITER_CANDIDATES: [char; 4] = [',', '\t', ';', '|'];

/// Pick the delimiter that occurs most often in the sniff window.
/// `None` means nothing matched and the caller should fall back to `,`.
pub fn sniff_delimiter(sample: &str) -> Option<char> {
    let mut best: Option<(char, usize)> = None;
    for cand in DELIMITER_CANDIDATES {
        let count = sample.chars().filter(|&c| c == cand).count();
        if count == 0 {
            continue;
        }
        match best {
            Some((_, n)) if n >= count => {}
            _ => best = Some((cand, count)),
        }
    }
    best.map(|(c, _)| c)
}

pub fn extract_csv(path: &Path) -> Result<ExtractedContent, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let decoded = decode_text_bytes(&bytes);
    let text = normalize_newlines(&decoded.text);

    let mut meta = ExtractMeta::new(SourceKind::Csv, "csv");
    meta.encoding = Some(decoded.encoding);
    meta.rows_per_chunk_hint = Some(DEFAULT_CSV_ROWS_PER_CHUNK);
    if decoded.replaced {
        meta.warnings.push(warnings::DECODE_ERRORS_REPLACED.to_string());
    }

    if text.trim().is_empty() {
        meta.warnings.push(warnings::CSV_EMPTY.to_string());
        return Ok(ExtractedContent {
            full_text: String::new(),
            pages: None,
            num_pages: None,
            meta,
        });
    }

    let mut window_end = SNIFF_WINDOW_BYTES.min(text.len());
    while !text.is_char_boundary(window_end) {
        window_end -= 1;
    }
    let delimiter = match sniff_delimiter(&text[..window_end]) {
        Some(d) => d,
        None => {
            meta.warnings
                .push(warnings::CSV_DIALECT_SNIFF_FAILED.to_string());
            ','
        }
    };
    meta.delimiter = Some(delimiter);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut header: Vec<String> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut inconsistent = false;
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unparsable csv record");
                continue;
            }
        };
        if header.is_empty() {
            header = record.iter().map(|f| f.trim().to_string()).collect();
            continue;
        }
        if record.len() != header.len() {
            inconsistent = true;
        }
        // Pad or truncate the row to the header width.
        let line = header
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}={}", h, record.get(i).unwrap_or("").trim()))
            .collect::<Vec<_>>()
            .join(" / ");
        lines.push(line);
    }
    if inconsistent {
        meta.warnings
            .push(warnings::CSV_INCONSISTENT_COLUMNS.to_string());
    }
    meta.csv_header = if header.is_empty() {
        None
    } else {
        Some(header)
    };

    Ok(ExtractedContent {
        full_text: lines.join("\n"),
        pages: None,
        num_pages: None,
        meta,
    })
}
