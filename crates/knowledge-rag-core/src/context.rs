//! Context assembly: ranked hits → bounded context block + source list.
//!
//! Hits are taken in rank order. Each is rendered as a source marker line
//! followed by the chunk text; blocks are separated by a blank line. A hit
//! is either included whole or not at all: assembly stops at the first hit
//! that would push the context past `max_chars`.
//!
//! Hits are deduplicated by `(document_id, chunk_index)`, so a chunk that
//! appears twice (e.g. stored under two point ids) is rendered once.

use std::collections::HashSet;

use crate::models::{SearchHit, SourceRef};

/// Maximum characters of chunk text shown in a [`SourceRef::preview`].
pub const PREVIEW_CHARS: usize = 200;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Assembled context and the sources it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl AssembledContext {
    /// True when no hit made it into the context; the caller answers in
    /// pure-model mode.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Build the context block for the generator.
///
/// # Example
///
/// ```rust
/// use knowledge_rag_core::context::assemble;
///
/// let ctx = assemble(&[], 4000);
/// assert!(ctx.is_empty());
/// assert_eq!(ctx.text, "");
/// ```
pub fn assemble(hits: &[SearchHit], max_chars: usize) -> AssembledContext {
    let mut seen: HashSet<(&str, usize)> = HashSet::new();
    let mut text = String::new();
    let mut used = 0usize;
    let mut sources = Vec::new();

    for hit in hits {
        let key = (hit.payload.document_id.as_str(), hit.payload.chunk_index);
        if !seen.insert(key) {
            continue;
        }

        let block = format!(
            "[Source {}: {} #{}]\n{}",
            sources.len() + 1,
            hit.payload.filename,
            hit.payload.chunk_index,
            hit.payload.text
        );
        let block_chars = block.chars().count();
        let sep_chars = if text.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.len()
        };

        if used + sep_chars + block_chars > max_chars {
            break;
        }

        if sep_chars > 0 {
            text.push_str(BLOCK_SEPARATOR);
        }
        text.push_str(&block);
        used += sep_chars + block_chars;

        sources.push(SourceRef {
            document_id: hit.payload.document_id.clone(),
            filename: hit.payload.filename.clone(),
            chunk_index: hit.payload.chunk_index,
            score: round_score(hit.score),
            preview: preview(&hit.payload.text),
        });
    }

    AssembledContext { text, sources }
}

/// First [`PREVIEW_CHARS`] characters of `text`, with `...` when cut.
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn round_score(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}
