//! Boundary-aware overlapping text chunker.
//!
//! Splits cleaned document text into windows of at most `chunk_size`
//! characters, preferring to cut at sentence endings, then at word
//! boundaries, and only then at the exact window edge. Consecutive
//! chunks overlap by `chunk_overlap` characters so that sentences
//! straddling a cut appear intact in at least one chunk.
//!
//! All offsets and sizes are in characters, not bytes, so multi-byte
//! text chunks the same way as ASCII.

use std::collections::BTreeMap;

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Sentence endings searched for near a window edge, best match wins.
const SENTENCE_ENDINGS: [&str; 7] = [". ", "! ", "? ", "。", "！", "？", "\n\n"];

/// Characters accepted as a word boundary in the fallback search.
const WORD_BREAKS: [char; 3] = [' ', '\n', '\t'];

/// How far back from the window edge a sentence ending may be.
const SENTENCE_WINDOW: usize = 100;

/// Half-width of the word-boundary search window around the edge.
const WORD_WINDOW: usize = 50;

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Build a chunker. Fails if `chunk_overlap >= chunk_size`; with that
    /// invariant held the walk always makes forward progress.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Split `text` into chunks, attaching `metadata` to each.
    ///
    /// Empty or whitespace-only input yields no chunks. Input shorter
    /// than `chunk_size` yields a single chunk holding the whole
    /// cleaned text.
    pub fn chunk(&self, text: &str, metadata: &BTreeMap<String, String>) -> Vec<Chunk> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = cleaned.chars().collect();
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = start + self.chunk_size;
            if end < chars.len() {
                end = find_break_point(&chars, start, end);
            }
            let window_end = end.min(chars.len());

            let chunk_text: String = chars[start..window_end].iter().collect();
            let chunk_text = chunk_text.trim();
            if !chunk_text.is_empty() {
                chunks.push(Chunk {
                    text: chunk_text.to_string(),
                    chunk_index: chunks.len(),
                    start,
                    end: window_end,
                    metadata: metadata.clone(),
                });
            }

            // Overlap the next window with this one. If that would not
            // move past the previous chunk's start, jump to the window
            // end instead so the walk terminates.
            let next = end.saturating_sub(self.chunk_overlap);
            start = match chunks.last() {
                Some(last) if next <= last.start => end,
                _ => next,
            };
        }

        chunks
    }
}

/// Collapse whitespace runs to single spaces and trim the ends.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the cut position for a window ending at `preferred_end`.
///
/// Searches backward up to [`SENTENCE_WINDOW`] characters (and up to
/// [`WORD_WINDOW`] past the edge) for the latest sentence ending; falls
/// back to the nearest word boundary around the edge, then to
/// `preferred_end` itself. The returned position never exceeds the text
/// length and may lie up to [`WORD_WINDOW`] past `preferred_end`.
fn find_break_point(chars: &[char], start: usize, preferred_end: usize) -> usize {
    let search_start = start.max(preferred_end.saturating_sub(SENTENCE_WINDOW));
    let search_end = (preferred_end + WORD_WINDOW).min(chars.len());
    let search = &chars[search_start..search_end];

    let mut best_break: Option<usize> = None;
    for ending in SENTENCE_ENDINGS {
        let needle: Vec<char> = ending.chars().collect();
        if let Some(pos) = rfind_chars(search, &needle) {
            let candidate = search_start + pos + needle.len();
            best_break = Some(best_break.map_or(candidate, |b| b.max(candidate)));
        }
    }

    if let Some(best) = best_break {
        if best > start {
            return best;
        }
    }

    let word_start = preferred_end.saturating_sub(WORD_WINDOW);
    let word_search = &chars[word_start..search_end];
    let mut i = word_search.len() / 2;
    while i > 0 {
        if WORD_BREAKS.contains(&word_search[i]) {
            let candidate = word_start + i + 1;
            // A break at or before the window start would stall the walk.
            if candidate > start {
                return candidate;
            }
            break;
        }
        i -= 1;
    }

    preferred_end
}

/// Position of the last occurrence of `needle` in `haystack`.
fn rfind_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let mut i = haystack.len() - needle.len();
    loop {
        if haystack[i..i + needle.len()] == *needle {
            return Some(i);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(size, overlap).unwrap()
    }

    fn no_meta() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_rejects_overlap_not_less_than_size() {
        assert!(TextChunker::new(100, 100).is_err());
        assert!(TextChunker::new(100, 150).is_err());
        let err = TextChunker::new(50, 50).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_empty_and_whitespace_yield_no_chunks() {
        let c = chunker(100, 20);
        assert!(c.chunk("", &no_meta()).is_empty());
        assert!(c.chunk("   \n\t  ", &no_meta()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker(100, 20);
        let chunks = c.chunk("  Hello,   world!  ", &no_meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_three_hundred_chars_bounded_chunks() {
        // One paragraph of ~300 chars with sentence boundaries.
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(7);
        assert!(text.len() >= 300);
        let c = chunker(100, 20);
        let chunks = c.chunk(&text, &no_meta());
        assert!(
            (3..=5).contains(&chunks.len()),
            "expected 3-5 chunks, got {}",
            chunks.len()
        );
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 150);
        }
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let text = "First sentence here. Second sentence follows. Third one closes the set. \
                    And a fourth to push past the window edge for good measure."
            .to_string();
        let c = chunker(60, 10);
        let chunks = c.chunk(&text, &no_meta());
        assert!(chunks.len() > 1);
        // Interior chunks end where a sentence does.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with('.'),
                "chunk did not end at a sentence: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_forward_progress_without_boundaries() {
        // No spaces or punctuation anywhere, worst case for the cutter.
        let text = "a".repeat(1000);
        let c = chunker(100, 20);
        let chunks = c.chunk(&text, &no_meta());
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 1000 / (100 - 20) + 2);
        for pair in chunks.windows(2) {
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_isolated_leading_space_does_not_stall() {
        // One space early on, then a long unbroken run: the word-boundary
        // fallback keeps finding the same break behind the window start.
        let text = format!("xx {}", "y".repeat(400));
        let c = chunker(30, 5);
        let chunks = c.chunk(&text, &no_meta());
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_bounded_output_across_size_and_overlap() {
        let with_boundaries = "One two three. Four five six. Seven eight nine. ".repeat(40);
        let unbroken = "x".repeat(1903);
        for &(size, overlap) in &[(30, 0), (50, 10), (80, 40), (100, 99), (250, 50)] {
            let c = chunker(size, overlap);
            for text in [with_boundaries.as_str(), unbroken.as_str()] {
                let chunks = c.chunk(text, &no_meta());
                assert!(!chunks.is_empty());
                // A cut may run up to the 50-char search slack past the
                // window edge, and every window starts strictly after
                // the previous one.
                for chunk in &chunks {
                    assert!(
                        chunk.text.chars().count() <= size + 50,
                        "size={} overlap={}: chunk of {} chars",
                        size,
                        overlap,
                        chunk.text.chars().count()
                    );
                }
                for pair in chunks.windows(2) {
                    assert!(pair[0].start < pair[1].start);
                }
                assert!(chunks.len() <= text.chars().count());
            }
            // Without natural boundaries the stride is exact, so the
            // chunk count stays near chars / (size - overlap).
            let chunks = c.chunk(&unbroken, &no_meta());
            let stride = size - overlap;
            assert!(
                chunks.len() <= unbroken.len() / stride.max(1) + 2,
                "size={} overlap={}: {} chunks",
                size,
                overlap,
                chunks.len()
            );
        }
    }

    #[test]
    fn test_multibyte_sentence_endings() {
        let text = "これは最初の文です。これは二番目の文です。これは三番目の文です。".repeat(8);
        let c = chunker(40, 10);
        let chunks = c.chunk(&text, &no_meta());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 40 + 50);
        }
    }

    #[test]
    fn test_metadata_attached_to_every_chunk() {
        let mut meta = BTreeMap::new();
        meta.insert("source".to_string(), "notes.md".to_string());
        let c = chunker(50, 10);
        let chunks = c.chunk(&"word ".repeat(100), &meta);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.get("source").map(String::as_str), Some("notes.md"));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota kappa.".repeat(10);
        let c = chunker(80, 16);
        let a = c.chunk(&text, &no_meta());
        let b = c.chunk(&text, &no_meta());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.start, y.start);
            assert_eq!(x.end, y.end);
        }
    }

    #[test]
    fn test_contiguous_indices() {
        let c = chunker(50, 10);
        let chunks = c.chunk(&"Sentence one. Sentence two. ".repeat(20), &no_meta());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }
}
