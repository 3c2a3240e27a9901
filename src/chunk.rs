//! Sliding-window text chunker.
//!
//! Splits loaded document text into passages of at most `chunk_size`
//! characters, with `overlap` characters shared between consecutive passages
//! from the same source. Window ends prefer whitespace boundaries so words
//! are not cut mid-stream. Pure and deterministic: the same input always
//! yields the same passage boundaries. Source metadata is carried onto every
//! passage.

use crate::models::{LoadedDocument, Passage};

/// Chunk every loaded document, preserving source metadata on each passage.
/// Whitespace-only passages are dropped.
pub fn split_documents(
    documents: &[LoadedDocument],
    chunk_size: usize,
    overlap: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();
    for doc in documents {
        for piece in split_text(&doc.text, chunk_size, overlap) {
            passages.push(Passage {
                text: piece,
                source: doc.source.clone(),
                filename: doc.filename.clone(),
            });
        }
    }
    passages
}

/// Split `text` into overlapping windows of at most `chunk_size` characters.
///
/// The next window starts `overlap` characters before the previous one ended.
/// When a window does not reach the end of the text, its end is pulled back
/// to the last whitespace inside the window, as long as that still leaves the
/// window strictly longer than the overlap (otherwise the scan would stall).
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < chunk_size);

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let mut end = hard_end;

        if hard_end < chars.len() {
            if let Some(ws) = (start..hard_end).rev().find(|&i| chars[i].is_whitespace()) {
                if ws + 1 > start + overlap {
                    end = ws + 1;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end - overlap;
    }

    pieces
}
