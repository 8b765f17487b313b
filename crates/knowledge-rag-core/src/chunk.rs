//! Boundary-aware, overlapping text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most
//! `chunk_size` characters, preferring to end each chunk just after a
//! sentence terminal, with `overlap` characters shared between
//! consecutive chunks.
//!
//! All offsets are in characters, not bytes, so CJK text is measured the
//! same way as ASCII.
//!
//! # Algorithm
//!
//! 1. Start the cursor at 0.
//! 2. Tentative end = `cursor + chunk_size`.
//! 3. If that is not the end of the text, scan backwards through at most
//!    `boundary_window` characters (never into the first half of the chunk)
//!    for one of `。！？.!?\n`; end just after it if found, otherwise hard-cut.
//! 4. If the text left after the end is no longer than the overlap window
//!    (`min(overlap, chunk_size / 2)`), extend the chunk to the end of the
//!    text instead of emitting a near-duplicate tail chunk.
//! 5. Emit `[cursor, end)`, then advance to `max(cursor + 1, end - overlap)`.
//!
//! The `cursor + 1` floor guarantees termination for any overlap,
//! including `overlap >= chunk_size`.
//!
//! # Example
//!
//! ```rust
//! use knowledge_rag_core::chunk::{split, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 512, overlap: 50, boundary_window: 100 };
//! let chunks = split("doc-1", "Hello world. Second sentence.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use uuid::Uuid;

use crate::models::Chunk;

/// Characters that end a sentence.
pub const SENTENCE_TERMINALS: [char; 7] = ['。', '！', '？', '.', '!', '?', '\n'];

/// Chunking parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Maximum characters per chunk before tail absorption.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// How far back from the tentative end to look for a sentence terminal.
    pub boundary_window: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
            boundary_window: 100,
        }
    }
}

/// Split normalized text into ordered, overlapping chunks.
///
/// Chunk indices are contiguous from 0. Empty or whitespace-only text
/// yields no chunks. Every chunk gets a fresh UUID, so re-ingesting the
/// same text never reuses ids.
pub fn split(document_id: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();

    for (start, end) in chunk_spans(&chars, params) {
        let piece: String = chars[start..end].iter().collect();
        if piece.trim().is_empty() {
            continue;
        }
        chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index: chunks.len(),
            start,
            end,
            text: piece,
        });
    }

    chunks
}

/// Compute `[start, end)` character spans without materializing chunks.
///
/// Spans are returned in strictly increasing start order and together cover
/// every character of `chars`.
pub fn chunk_spans(chars: &[char], params: &ChunkParams) -> Vec<(usize, usize)> {
    let len = chars.len();
    let size = params.chunk_size.max(1);
    let tail_limit = params.overlap.min(size / 2);

    let mut spans = Vec::new();
    let mut cursor = 0;

    while cursor < len {
        let mut end = (cursor + size).min(len);

        if end < len {
            if let Some(boundary) = find_boundary(chars, cursor, end, size, params.boundary_window)
            {
                end = boundary;
            }
            if len - end <= tail_limit {
                end = len;
            }
        }

        spans.push((cursor, end));

        if end >= len {
            break;
        }
        cursor = (cursor + 1).max(end.saturating_sub(params.overlap));
    }

    spans
}

/// Position just after the last sentence terminal in the search window, if any.
fn find_boundary(
    chars: &[char],
    cursor: usize,
    end: usize,
    size: usize,
    window: usize,
) -> Option<usize> {
    let lower = (cursor + (size / 2).max(1)).max(end.saturating_sub(window));
    (lower..end)
        .rev()
        .find(|&i| SENTENCE_TERMINALS.contains(&chars[i]))
        .map(|i| i + 1)
}
