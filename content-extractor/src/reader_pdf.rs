//! PDF extraction with a primary engine, quality assessment, and a
//! secondary-engine fallback when the primary output looks degraded.

use std::path::Path;

use crate::quality::{assess_pdf_quality, replacement_ratio};
use crate::{
    engine_lopdf, engine_pdf_extract, warnings, ExtractError, ExtractMeta, ExtractedContent,
    FallbackReport, SourceKind,
};

/// One engine's complete output plus its assessment.
#[derive(Debug, Clone)]
pub(crate) struct EngineOutcome {
    pub engine: &'static str,
    pub full_text: String,
    pub pages: Vec<String>,
    pub warnings: Vec<String>,
    pub replacement_ratio: f32,
}

impl EngineOutcome {
    fn assess(engine: &'static str, pages: Vec<String>, encoding_unimplemented: bool) -> Self {
        let full_text = pages.join("\n").trim().to_string();
        let warnings = assess_pdf_quality(&full_text, &pages, encoding_unimplemented);
        let replacement_ratio = replacement_ratio(&full_text);
        Self {
            engine,
            full_text,
            pages,
            warnings,
            replacement_ratio,
        }
    }

    fn has(&self, warning: &str) -> bool {
        self.warnings.iter().any(|w| w == warning)
    }
}

/// Warnings that justify running the secondary engine.
const FALLBACK_TRIGGERS: [&str; 5] = [
    warnings::LOW_TEXT_VOLUME,
    warnings::REPLACEMENT_CHARACTERS_MANY,
    warnings::IMAGE_PDF_SUSPECTED,
    warnings::MOJIBAKE_SUSPECTED,
    warnings::ADVANCED_ENCODING_UNIMPLEMENTED,
];

const LENGTH_DIFF_FRACTION: f32 = 0.10;

/// Decide which engine output to keep. Returns the winner and the rule name
/// recorded in the fallback report.
pub(crate) fn select_better(
    primary: &EngineOutcome,
    secondary: &EngineOutcome,
) -> (bool, &'static str) {
    // true = keep primary
    if primary.has(warnings::ADVANCED_ENCODING_UNIMPLEMENTED) {
        return (false, "primary_encoding_unimplemented");
    }
    let p_moji = primary.has(warnings::MOJIBAKE_SUSPECTED);
    let s_moji = secondary.has(warnings::MOJIBAKE_SUSPECTED);
    if p_moji != s_moji {
        return (s_moji, "mojibake");
    }
    let p_len = primary.full_text.chars().count();
    let s_len = secondary.full_text.chars().count();
    let base = p_len.max(s_len).max(1) as f32;
    if (p_len as f32 - s_len as f32).abs() / base > LENGTH_DIFF_FRACTION {
        return (p_len > s_len, "text_length");
    }
    if primary.replacement_ratio != secondary.replacement_ratio {
        return (
            primary.replacement_ratio < secondary.replacement_ratio,
            "replacement_ratio",
        );
    }
    if primary.warnings.len() != secondary.warnings.len() {
        return (primary.warnings.len() < secondary.warnings.len(), "warning_count");
    }
    (true, "default_primary")
}

pub fn extract_pdf(path: &Path) -> Result<ExtractedContent, ExtractError> {
    let primary_pages = engine_lopdf::extract_pages(path)?;
    let primary = EngineOutcome::assess(
        engine_lopdf::ENGINE,
        primary_pages.pages,
        primary_pages.encoding_unimplemented,
    );

    let needs_fallback = primary
        .warnings
        .iter()
        .any(|w| FALLBACK_TRIGGERS.contains(&w.as_str()));

    let (chosen, fallback) = if needs_fallback {
        match engine_pdf_extract::extract_pages(path) {
            Ok(pages) => {
                let secondary = EngineOutcome::assess(engine_pdf_extract::ENGINE, pages, false);
                let (keep_primary, reason) = select_better(&primary, &secondary);
                let report = FallbackReport {
                    attempted: true,
                    chosen: if keep_primary {
                        primary.engine.to_string()
                    } else {
                        secondary.engine.to_string()
                    },
                    reason: reason.to_string(),
                    primary_chars: primary.full_text.chars().count(),
                    secondary_chars: secondary.full_text.chars().count(),
                    primary_replacement_ratio: primary.replacement_ratio,
                    secondary_replacement_ratio: secondary.replacement_ratio,
                    primary_warnings: primary.warnings.clone(),
                    secondary_warnings: secondary.warnings.clone(),
                    secondary_error: None,
                };
                let chosen = if keep_primary { primary } else { secondary };
                (chosen, Some(report))
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err,
                    "secondary pdf engine failed, keeping primary output");
                let report = FallbackReport {
                    attempted: true,
                    chosen: primary.engine.to_string(),
                    reason: "secondary_failed".to_string(),
                    primary_chars: primary.full_text.chars().count(),
                    secondary_chars: 0,
                    primary_replacement_ratio: primary.replacement_ratio,
                    secondary_replacement_ratio: 0.0,
                    primary_warnings: primary.warnings.clone(),
                    secondary_warnings: Vec::new(),
                    secondary_error: Some(err.to_string()),
                };
                (primary, Some(report))
            }
        }
    } else {
        (primary, None)
    };

    let mut meta = ExtractMeta::new(SourceKind::Pdf, chosen.engine);
    meta.warnings = chosen.warnings.clone();
    meta.fallback = fallback;

    let num_pages = chosen.pages.len() as u32;
    Ok(ExtractedContent {
        full_text: chosen.full_text,
        pages: Some(chosen.pages),
        num_pages: Some(num_pages),
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        engine: &'static str,
        text: &str,
        warnings: &[&str],
        replacement_ratio: f32,
    ) -> EngineOutcome {
        EngineOutcome {
            engine,
            full_text: text.to_string(),
            pages: vec![text.to_string()],
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
            replacement_ratio,
        }
    }

    #[test]
    fn encoding_failure_always_prefers_secondary() {
        let p = outcome(
            "lopdf",
            &"長い本文".repeat(100),
            &[warnings::ADVANCED_ENCODING_UNIMPLEMENTED],
            0.0,
        );
        let s = outcome("pdf-extract", "短い", &[warnings::LOW_TEXT_VOLUME], 0.5);
        let (keep_primary, reason) = select_better(&p, &s);
        assert!(!keep_primary);
        assert_eq!(reason, "primary_encoding_unimplemented");
    }

    #[test]
    fn clean_side_wins_on_mojibake() {
        let p = outcome("lopdf", &"æ–‡å­—".repeat(100), &[warnings::MOJIBAKE_SUSPECTED], 0.0);
        let s = outcome("pdf-extract", &"文字".repeat(100), &[], 0.0);
        assert_eq!(select_better(&p, &s), (false, "mojibake"));

        let p2 = outcome("lopdf", &"文字".repeat(100), &[], 0.0);
        let s2 = outcome("pdf-extract", &"æ–‡å­—".repeat(100), &[warnings::MOJIBAKE_SUSPECTED], 0.0);
        assert_eq!(select_better(&p2, &s2), (true, "mojibake"));
    }

    #[test]
    fn longer_text_wins_past_ten_percent() {
        let p = outcome("lopdf", &"あ".repeat(100), &[], 0.0);
        let s = outcome("pdf-extract", &"あ".repeat(150), &[], 0.0);
        assert_eq!(select_better(&p, &s), (false, "text_length"));
    }

    #[test]
    fn small_length_gap_falls_to_replacement_ratio() {
        let p = outcome("lopdf", &"あ".repeat(100), &[], 0.02);
        let s = outcome("pdf-extract", &"あ".repeat(105), &[], 0.0);
        assert_eq!(select_better(&p, &s), (false, "replacement_ratio"));
    }

    #[test]
    fn equal_metrics_keep_primary() {
        let p = outcome("lopdf", &"あ".repeat(100), &[], 0.0);
        let s = outcome("pdf-extract", &"あ".repeat(100), &[], 0.0);
        assert_eq!(select_better(&p, &s), (true, "default_primary"));
    }

    #[test]
    fn fewer_warnings_break_the_tie() {
        let p = outcome("lopdf", &"あ".repeat(100), &[warnings::LOW_TEXT_VOLUME], 0.0);
        let s = outcome("pdf-extract", &"あ".repeat(100), &[], 0.0);
        assert_eq!(select_better(&p, &s), (false, "warning_count"));
    }
}
