//! Plain-text / Markdown extraction. Decoding tries a fixed encoding ladder
//! (UTF-8 with BOM, UTF-8, CP932, EUC-JP, ISO-2022-JP); the first clean
//! decode wins, otherwise UTF-8 with replacement is used and flagged.

use std::path::Path;

use encoding_rs::{Encoding, EUC_JP, ISO_2022_JP, SHIFT_JIS, UTF_8};

use crate::quality::replacement_ratio;
use crate::{warnings, ExtractError, ExtractMeta, ExtractedContent, SourceKind};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

// CP932 and Shift_JIS both resolve to windows-31j in encoding_rs, so the
// ladder carries a single entry for the pair.
const LADDER: [(&str, &'static Encoding); 4] = [
    ("utf-8", UTF_8),
    ("cp932", SHIFT_JIS),
    ("euc-jp", EUC_JP),
    ("iso-2022-jp", ISO_2022_JP),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: String,
    pub replaced: bool,
}

/// Decode raw bytes using the ladder. Never fails; the worst case is a
/// lossy UTF-8 decode with `replaced = true`.
pub fn decode_text_bytes(bytes: &[u8]) -> DecodedText {
    if bytes.starts_with(&UTF8_BOM) {
        let (text, _, had_errors) = UTF_8.decode(&bytes[UTF8_BOM.len()..]);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: "utf-8-sig".to_string(),
                replaced: false,
            };
        }
    }
    for (label, encoding) in LADDER {
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: label.to_string(),
                replaced: false,
            };
        }
    }
    let (text, _) = UTF_8.decode_without_bom_handling(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: "utf-8".to_string(),
        replaced: true,
    }
}

/// Normalise CRLF / lone CR to LF.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn extract_text(path: &Path) -> Result<ExtractedContent, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let decoded = decode_text_bytes(&bytes);
    let full_text = normalize_newlines(&decoded.text);

    let mut meta = ExtractMeta::new(SourceKind::Text, "text");
    meta.encoding = Some(decoded.encoding);
    if decoded.replaced {
        meta.warnings.push(warnings::DECODE_ERRORS_REPLACED.to_string());
    }
    if replacement_ratio(&full_text) > 0.01 {
        meta.warnings
            .push(warnings::REPLACEMENT_CHARACTERS_MANY.to_string());
    }

    Ok(ExtractedContent {
        full_text,
        pages: None,
        num_pages: None,
        meta,
    })
}
