//! Recursive character splitter. Separators are tried in order; a piece that
//! still exceeds the chunk size recurses into the remaining separators, with
//! the empty separator as the character-level last resort. Separators stay
//! attached to the piece that follows them, so concatenating the pieces
//! reproduces the input. Sizes are measured in characters.

pub const DEFAULT_CHUNK_SIZE: usize = 300;
pub const DEFAULT_CHUNK_OVERLAP: usize = 80;

#[derive(Debug, Clone)]
pub struct SplitParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<&'static str>,
}

impl SplitParams {
    /// Separators for page text: paragraph, line, Japanese sentence and
    /// clause breaks, space, then characters.
    pub fn pdf() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: vec!["\n\n", "\n", "。", "、", " ", ""],
        }
    }

    /// Text/Markdown: heading markers first, then the page separators.
    pub fn text() -> Self {
        Self {
            separators: vec!["# ", "## ", "### ", "\n\n", "\n", "。", "、", " ", ""],
            ..Self::pdf()
        }
    }

    pub fn generic() -> Self {
        Self::pdf()
    }

    pub fn with_sizes(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` on `sep`, keeping each separator prefixed to the piece that
/// follows it. The empty separator splits into single characters.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces: Vec<String> = Vec::new();
    let mut start = 0usize;
    let mut from = 0usize;
    while let Some(rel) = text[from..].find(sep) {
        let at = from + rel;
        if at > start {
            pieces.push(text[start..at].to_string());
        }
        start = at;
        from = at + sep.len();
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

/// Greedily pack pieces into chunks of at most `chunk_size` characters,
/// carrying at most `chunk_overlap` trailing characters into the next chunk.
fn merge_pieces(pieces: &[String], params: &SplitParams) -> Vec<String> {
    let mut docs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut total = 0usize;
    for piece in pieces {
        let plen = char_len(piece);
        if !current.is_empty() && total + plen > params.chunk_size {
            let doc = current.concat();
            let doc = doc.trim();
            if !doc.is_empty() {
                docs.push(doc.to_string());
            }
            while total > params.chunk_overlap
                || (total + plen > params.chunk_size && total > 0)
            {
                let first = current.remove(0);
                total -= char_len(first);
            }
        }
        current.push(piece.as_str());
        total += plen;
    }
    if !current.is_empty() {
        let doc = current.concat();
        let doc = doc.trim();
        if !doc.is_empty() {
            docs.push(doc.to_string());
        }
    }
    docs
}

fn split_recursive(text: &str, separators: &[&'static str], params: &SplitParams) -> Vec<String> {
    let mut separator: &str = separators.last().copied().unwrap_or("");
    let mut remaining: &[&'static str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            separator = sep;
            remaining = &separators[i + 1..];
            break;
        }
    }

    let pieces = split_keep_separator(text, separator);
    let mut chunks: Vec<String> = Vec::new();
    let mut good: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < params.chunk_size {
            good.push(piece);
        } else {
            if !good.is_empty() {
                chunks.extend(merge_pieces(&good, params));
                good.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(split_recursive(&piece, remaining, params));
            }
        }
    }
    if !good.is_empty() {
        chunks.extend(merge_pieces(&good, params));
    }
    chunks
}

/// Split `text` into chunks per `params`. Whitespace-only chunks are dropped.
pub fn split_text(text: &str, params: &SplitParams) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_recursive(text, &params.separators, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("経費精算の締め日は毎月25日です。", &SplitParams::pdf());
        assert_eq!(chunks, vec!["経費精算の締め日は毎月25日です。"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("   \n\n ", &SplitParams::pdf()).is_empty());
    }

    #[test]
    fn chunks_never_exceed_the_size() {
        let text = "これは比較的長い説明文です。複数の文から構成されています。".repeat(40);
        let params = SplitParams::pdf();
        let chunks = split_text(&text, &params);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= params.chunk_size, "oversized chunk: {}", c.chars().count());
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let para = "短い段落です。".repeat(5);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let params = SplitParams::pdf().with_sizes(40, 0);
        let chunks = split_text(&text, &params);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.trim_start_matches('\n').starts_with("短い段落")));
    }

    #[test]
    fn unbroken_text_falls_back_to_character_windows_with_overlap() {
        let text: String = (0..1000)
            .map(|i| char::from_digit((i % 10) as u32, 10).unwrap())
            .collect();
        let params = SplitParams::pdf().with_sizes(300, 80);
        let chunks = split_text(&text, &params);
        assert!(chunks.len() >= 4);
        assert_eq!(chunks[0].chars().count(), 300);
        // The next chunk re-reads the previous tail.
        let tail: String = chunks[0].chars().skip(300 - 80).collect();
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn every_chunk_is_a_contiguous_slice_of_the_input() {
        let text = "第一条 この規程は、経費の精算について定める。第二条 申請は所属長の承認を要する。"
            .repeat(20);
        let chunks = split_text(&text, &SplitParams::pdf());
        for c in &chunks {
            assert!(
                text.contains(c.trim()),
                "chunk is not a contiguous slice of the input"
            );
        }
    }

    #[test]
    fn markdown_headings_cut_early() {
        let text = "# 概要\n社内規程の概要です\n# 手続き\n申請フローの説明です";
        let params = SplitParams::text().with_sizes(20, 0);
        let chunks = split_text(text, &params);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("# 概要"));
        assert!(chunks[1].starts_with("# 手続き"));
    }
}
