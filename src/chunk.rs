//! Overlapping fixed-window text chunker.
//!
//! Splits a [`Document`]'s text into [`Chunk`]s of at most `max_size`
//! bytes, where consecutive chunks share `overlap` bytes so that context
//! spanning a boundary is present in both neighbours.
//!
//! Each chunk gets a deterministic id derived from its document id and
//! sequence index, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Start a cursor at offset 0.
//! 2. The window is `[cursor, min(cursor + max_size, len))`, snapped back to
//!    a UTF-8 char boundary.
//! 3. If the window reaches the end of the text, emit it and stop.
//! 4. Otherwise look backward from the window end, within the last 10% of
//!    the window, for a sentence end (`.`, `!`, `?` followed by
//!    whitespace), then for any whitespace. Cut just after it; if neither
//!    exists, hard-cut at the window end.
//! 5. Emit `[cursor, cut)` unless it is whitespace only.
//! 6. Move the cursor to `cut - overlap` and repeat.
//!
//! The remaining tail is always emitted as one final chunk starting
//! `overlap` bytes before the previous end; it is never padded, so it may be
//! shorter than `max_size`.
//!
//! # Example
//!
//! ```rust
//! use rag_harness::chunk::chunk_document;
//! use rag_harness::models::Document;
//!
//! let doc = Document::new("doc-1", "Doc", "Hello world.");
//! let chunks = chunk_document(&doc, 800, 200).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-1_chunk_0");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Boundary search covers the last `max_size / 10` bytes of a window.
const BOUNDARY_TOLERANCE_DIVISOR: usize = 10;

/// Check the chunking window parameters: `0 < overlap < max_size`.
pub fn validate_window(max_size: usize, overlap: usize) -> Result<()> {
    if max_size == 0 {
        return Err(RagError::invalid("chunking max_size must be > 0"));
    }
    if overlap == 0 || overlap >= max_size {
        return Err(RagError::invalid(format!(
            "chunking overlap must satisfy 0 < overlap < max_size (overlap = {}, max_size = {})",
            overlap, max_size
        )));
    }
    Ok(())
}

/// Split a document into overlapping chunks.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Adjacent chunks share exactly `overlap` bytes (up to char-boundary
///   snapping for multi-byte text).
/// - Chunks cover the text without gaps, except for whitespace-only
///   windows, which are dropped.
/// - A text no longer than `max_size` yields one chunk with no overlap; a
///   blank text yields none.
///
/// # Errors
///
/// [`RagError::InvalidArgument`] unless `0 < overlap < max_size`.
pub fn chunk_document(document: &Document, max_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_window(max_size, overlap)?;
    Ok(chunk_text(&document.id, &document.text, max_size, overlap))
}

fn chunk_text(document_id: &str, text: &str, max_size: usize, overlap: usize) -> Vec<Chunk> {
    let len = text.len();
    let mut chunks = Vec::new();
    let mut cursor = 0;
    let mut last_end: Option<usize> = None;

    while cursor < len {
        let window_end = window_end(text, cursor, max_size);
        let end = if window_end >= len {
            len
        } else {
            find_break(text, cursor, window_end, max_size, overlap)
        };

        let piece = &text[cursor..end];
        if !piece.trim().is_empty() {
            let shared = last_end.map(|e| e.saturating_sub(cursor)).unwrap_or(0);
            chunks.push(make_chunk(
                document_id,
                chunks.len(),
                cursor,
                end,
                piece,
                shared,
            ));
            last_end = Some(end);
        }

        if end >= len {
            break;
        }
        cursor = next_cursor(text, cursor, end, overlap);
    }

    chunks
}

/// End of the raw window starting at `cursor`, on a char boundary.
fn window_end(text: &str, cursor: usize, max_size: usize) -> usize {
    let end = snap_to_char_boundary(text, cursor.saturating_add(max_size));
    if end > cursor {
        return end;
    }
    // A single character wider than the window: take it whole.
    text[cursor..]
        .chars()
        .next()
        .map(|c| cursor + c.len_utf8())
        .unwrap_or(text.len())
}

/// Pick the cut point for a window that does not reach the end of the text.
///
/// Only cuts that leave the next cursor strictly after `cursor` are
/// considered, so the loop always makes progress.
fn find_break(
    text: &str,
    cursor: usize,
    window_end: usize,
    max_size: usize,
    overlap: usize,
) -> usize {
    let bytes = text.as_bytes();

    // Already on a word boundary.
    if bytes[window_end].is_ascii_whitespace() || bytes[window_end - 1].is_ascii_whitespace() {
        return window_end;
    }

    let tolerance = (max_size / BOUNDARY_TOLERANCE_DIVISOR).max(1);
    let floor = window_end
        .saturating_sub(tolerance)
        .max(cursor + overlap + 1);
    if floor >= window_end {
        return window_end;
    }

    let mut whitespace_cut = None;
    for pos in (floor..window_end).rev() {
        if !bytes[pos].is_ascii_whitespace() {
            continue;
        }
        if pos > 0 && matches!(bytes[pos - 1], b'.' | b'!' | b'?') {
            return pos + 1;
        }
        whitespace_cut.get_or_insert(pos + 1);
    }
    whitespace_cut.unwrap_or(window_end)
}

fn next_cursor(text: &str, cursor: usize, end: usize, overlap: usize) -> usize {
    let next = snap_to_char_boundary(text, end.saturating_sub(overlap));
    if next > cursor {
        next
    } else {
        end
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(
    document_id: &str,
    index: usize,
    start: usize,
    end: usize,
    text: &str,
    overlap: usize,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}_chunk_{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        end,
        text: text.to_string(),
        overlap,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("doc1", "Doc 1", text)
    }

    fn spans(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.start, c.end)).collect()
    }

    /// Concatenate chunk texts, skipping the part each chunk shares with
    /// the previous one.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for c in chunks {
            assert!(c.start <= covered, "gap before {}", c.id);
            if c.end > covered {
                out.push_str(&c.text[covered - c.start..]);
                covered = c.end;
            }
        }
        out
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document(&doc("Hello, world!"), 800, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(spans(&chunks), vec![(0, 13)]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chunk_document(&doc(""), 40, 10).unwrap().is_empty());
        assert!(chunk_document(&doc("   \n\t "), 40, 10).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_window() {
        for (max, overlap) in [(0, 0), (40, 0), (40, 40), (40, 50)] {
            let err = chunk_document(&doc("text"), max, overlap).unwrap_err();
            assert!(matches!(err, RagError::InvalidArgument(_)), "{max}/{overlap}");
        }
    }

    #[test]
    fn test_three_sentence_document() {
        let text = format!("{}.{}.{}.", "a".repeat(32), "b".repeat(32), "c".repeat(33));
        assert_eq!(text.len(), 100);
        let chunks = chunk_document(&doc(&text), 40, 10).unwrap();
        assert_eq!(spans(&chunks), vec![(0, 40), (30, 70), (60, 100)]);
        assert_eq!(chunks[1].overlap, 10);
        assert_eq!(chunks[2].overlap, 10);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_tail_is_not_padded() {
        let text = "x".repeat(41);
        let chunks = chunk_document(&doc(&text), 40, 10).unwrap();
        assert_eq!(spans(&chunks), vec![(0, 40), (30, 41)]);
        assert_eq!(chunks[1].text.len(), 11);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = format!("{}. {}", "x".repeat(93), "y".repeat(60));
        let chunks = chunk_document(&doc(&text), 100, 20).unwrap();
        assert_eq!(chunks[0].end, 95);
        assert!(chunks[0].text.ends_with(". "));
        assert_eq!(chunks[1].start, 75);
        assert_eq!(chunks[1].end, text.len());
    }

    #[test]
    fn test_falls_back_to_whitespace() {
        let text = format!("{} {}", "x".repeat(95), "y".repeat(60));
        let chunks = chunk_document(&doc(&text), 100, 20).unwrap();
        assert_eq!(chunks[0].end, 96);
        assert_eq!(chunks[1].start, 76);
    }

    #[test]
    fn test_hard_cut_without_boundary() {
        let text = "z".repeat(150);
        let chunks = chunk_document(&doc(&text), 100, 20).unwrap();
        assert_eq!(spans(&chunks), vec![(0, 100), (80, 150)]);
    }

    #[test]
    fn test_prose_chunks_end_on_whitespace() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let chunks = chunk_document(&doc(&text), 100, 25).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.len() <= 100);
            let next = text[c.end..].chars().next();
            assert!(
                c.text.ends_with(char::is_whitespace) || next.map_or(true, char::is_whitespace),
                "chunk {} splits a word: {:?}",
                c.id,
                c.text
            );
        }
    }

    #[test]
    fn test_coverage_and_overlap() {
        let texts = [
            "The quick brown fox jumps over the lazy dog. ".repeat(20),
            "Sentence one! Sentence two? Sentence three.\nNew line here. ".repeat(9),
            "nospacesatallinthisverylongtokenthatkeepsgoing".repeat(6),
        ];
        for text in &texts {
            for (max, overlap) in [(40, 10), (50, 1), (64, 63), (7, 3), (100, 20)] {
                let chunks = chunk_document(&doc(text), max, overlap).unwrap();
                assert_eq!(&reconstruct(&chunks), text, "max={max} overlap={overlap}");
                for pair in chunks.windows(2) {
                    assert_eq!(pair[0].end - pair[1].start, overlap);
                    assert_eq!(pair[1].overlap, overlap);
                }
                for c in &chunks {
                    assert!(c.text.len() <= max);
                    assert_eq!(c.text, text[c.start..c.end]);
                }
            }
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        for (max, overlap) in [(7, 3), (16, 5), (2, 1)] {
            let chunks = chunk_document(&doc(text), max, overlap).unwrap();
            assert!(!chunks.is_empty());
            assert_eq!(reconstruct(&chunks), text);
        }
    }

    #[test]
    fn test_whitespace_windows_dropped() {
        let text = format!("abcdefgh{}ijklmnop", " ".repeat(50));
        let chunks = chunk_document(&doc(&text), 10, 2).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.id, format!("doc1_chunk_{}", i));
            assert!(!c.text.trim().is_empty());
        }
        assert!(chunks.first().unwrap().text.starts_with("abc"));
        assert!(chunks.last().unwrap().text.ends_with("nop"));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta. Gamma delta! Epsilon zeta? ".repeat(12);
        let c1 = chunk_document(&doc(&text), 60, 15).unwrap();
        let c2 = chunk_document(&doc(&text), 60, 15).unwrap();
        assert_eq!(c1, c2);
        let ids: std::collections::HashSet<_> = c1.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), c1.len());
    }
}
