//! Fixed-window text chunker.
//!
//! Splits file text into spans of at most `max_chars` characters,
//! optionally sharing `overlap_chars` between adjacent spans so context
//! straddling a boundary is not lost.
//!
//! Chunking is deterministic and stateless: identical input always yields
//! the same boundaries and indices, so chunk ids stay stable across
//! re-ingestion as long as the text does not change. Windows are measured
//! in characters and cut on char boundaries, never mid code point.

/// Split `text` into `(chunk_index, text)` windows of at most `max_chars`
/// characters, stepping `max_chars - overlap_chars` each time.
///
/// Empty or whitespace-only input produces no chunks.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(i64, String)> {
    assert!(max_chars > 0, "max_chars must be > 0");
    assert!(
        overlap_chars < max_chars,
        "overlap_chars must be smaller than max_chars"
    );

    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = max_chars - overlap_chars;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        chunks.push((index, piece));
        index += 1;

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
