//! Quality heuristics for extracted PDF text. The constants are tuned
//! against real in-house scans and mojibake samples; keep them next to the
//! checks they drive.

use crate::warnings;

const LOW_TEXT_CHARS: usize = 100;
const REPLACEMENT_RATIO_MAX: f32 = 0.01;
const EMPTY_PAGE_FRACTION_MAX: f32 = 0.6;
const C1_FRACTION_MAX: f32 = 0.003;
const LATIN1_HIGH_FRACTION_MAX: f32 = 0.02;
const JAPANESE_FRACTION_MIN: f32 = 0.10;

/// Proportion of U+FFFD replacement characters in `text` (0.0 for empty).
pub fn replacement_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let bad = text.chars().filter(|&c| c == '\u{FFFD}').count();
    bad as f32 / total as f32
}

fn is_japanese(c: char) -> bool {
    // Hiragana, Katakana (incl. halfwidth), CJK Unified Ideographs.
    matches!(c,
        '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{FF66}'..='\u{FF9F}'
        | '\u{4E00}'..='\u{9FFF}')
}

fn is_c1_control(c: char) -> bool {
    matches!(c, '\u{0080}'..='\u{009F}')
}

fn is_latin1_high(c: char) -> bool {
    matches!(c, '\u{00A0}'..='\u{00FF}')
}

/// Mojibake signal: C1 controls present, or Latin-1 high bytes dominating a
/// text that is not actually Japanese.
pub fn looks_like_mojibake(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let mut c1 = 0usize;
    let mut latin1 = 0usize;
    let mut japanese = 0usize;
    for c in text.chars() {
        if is_c1_control(c) {
            c1 += 1;
        } else if is_latin1_high(c) {
            latin1 += 1;
        }
        if is_japanese(c) {
            japanese += 1;
        }
    }
    let total = total as f32;
    if c1 as f32 / total > C1_FRACTION_MAX {
        return true;
    }
    latin1 as f32 / total > LATIN1_HIGH_FRACTION_MAX
        && (japanese as f32 / total) < JAPANESE_FRACTION_MIN
}

/// Assess one engine's PDF output. `encoding_unimplemented` is set when the
/// engine reported an unhandled font encoding on any page.
pub fn assess_pdf_quality(
    full_text: &str,
    pages: &[String],
    encoding_unimplemented: bool,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if full_text.chars().count() < LOW_TEXT_CHARS {
        out.push(warnings::LOW_TEXT_VOLUME.to_string());
    }
    if full_text.trim().is_empty() {
        out.push(warnings::NO_TEXT_EXTRACTED.to_string());
    }
    if replacement_ratio(full_text) > REPLACEMENT_RATIO_MAX {
        out.push(warnings::REPLACEMENT_CHARACTERS_MANY.to_string());
    }
    if !pages.is_empty() {
        let empty = pages.iter().filter(|p| p.trim().is_empty()).count();
        if empty as f32 / pages.len() as f32 >= EMPTY_PAGE_FRACTION_MAX {
            out.push(warnings::IMAGE_PDF_SUSPECTED.to_string());
        }
    }
    if looks_like_mojibake(full_text) {
        out.push(warnings::MOJIBAKE_SUSPECTED.to_string());
    }
    if encoding_unimplemented {
        out.push(warnings::ADVANCED_ENCODING_UNIMPLEMENTED.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages_of(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn short_text_flags_low_volume() {
        let w = assess_pdf_quality("短い", &pages_of(&["短い"]), false);
        assert!(w.contains(&warnings::LOW_TEXT_VOLUME.to_string()));
        assert!(!w.contains(&warnings::NO_TEXT_EXTRACTED.to_string()));
    }

    #[test]
    fn empty_text_flags_no_text_and_image_pdf() {
        let w = assess_pdf_quality("", &pages_of(&["", "", ""]), false);
        assert!(w.contains(&warnings::NO_TEXT_EXTRACTED.to_string()));
        assert!(w.contains(&warnings::IMAGE_PDF_SUSPECTED.to_string()));
    }

    #[test]
    fn image_pdf_threshold_is_sixty_percent() {
        // 3 of 5 pages empty = 60%, inclusive.
        let w = assess_pdf_quality(
            &"本文".repeat(60),
            &pages_of(&["本文", "", "", "", "本文"]),
            false,
        );
        assert!(w.contains(&warnings::IMAGE_PDF_SUSPECTED.to_string()));
        // 2 of 5 empty stays quiet.
        let w = assess_pdf_quality(
            &"本文".repeat(60),
            &pages_of(&["本文", "", "", "本文", "本文"]),
            false,
        );
        assert!(!w.contains(&warnings::IMAGE_PDF_SUSPECTED.to_string()));
    }

    #[test]
    fn replacement_characters_over_one_percent() {
        let mut text = "あ".repeat(197);
        text.push_str("\u{FFFD}\u{FFFD}\u{FFFD}");
        let w = assess_pdf_quality(&text, &[], false);
        assert!(w.contains(&warnings::REPLACEMENT_CHARACTERS_MANY.to_string()));

        let mut text = "あ".repeat(199);
        text.push('\u{FFFD}');
        let w = assess_pdf_quality(&text, &[], false);
        assert!(!w.contains(&warnings::REPLACEMENT_CHARACTERS_MANY.to_string()));
    }

    #[test]
    fn latin1_heavy_non_japanese_text_is_mojibake() {
        // Typical CP932-read-as-Latin-1 garbage.
        let garbage = "ï¿½æ–‡å­—åŒ–ã".repeat(30);
        assert!(looks_like_mojibake(&garbage));
    }

    #[test]
    fn japanese_text_with_accents_is_not_mojibake() {
        let text = format!("{}café", "これは普通の日本語の文章です。".repeat(10));
        assert!(!looks_like_mojibake(&text));
    }

    #[test]
    fn unhandled_encoding_surfaces_as_warning() {
        let w = assess_pdf_quality(&"本文".repeat(100), &[], true);
        assert!(w.contains(&warnings::ADVANCED_ENCODING_UNIMPLEMENTED.to_string()));
    }
}
