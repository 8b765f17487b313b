//! Core data models used throughout Knowledge RAG.
//!
//! These types represent the documents, chunks, index points, search hits
//! and answers that flow through the ingestion and question-answering
//! pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document handed to the pipeline for ingestion.
///
/// `text` is the raw extracted text; the pipeline normalizes it before
/// chunking. `byte_size` is the size of the original upload.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub filename: String,
    pub byte_size: u64,
    pub text: String,
}

impl DocumentInput {
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            filename: filename.into(),
            byte_size: text.len() as u64,
            text,
        }
    }
}

/// An ingested document. Owns its chunks; deleting the document removes
/// every chunk and vector derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub chunks: Vec<Chunk>,
}

/// A contiguous span of a document's normalized text.
///
/// `start` and `end` are character (not byte) offsets into the normalized
/// text; `text` is exactly that span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Metadata stored next to each vector so a hit is usable without looking
/// the chunk up again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl ChunkPayload {
    pub fn from_chunk(chunk: &Chunk, filename: &str) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            filename: filename.to_string(),
            chunk_index: chunk.chunk_index,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
        }
    }
}

/// A vector plus payload, ready for [`SimilarityIndex::upsert`](crate::index::SimilarityIndex::upsert).
///
/// `id` is the owning chunk's id, so point ids are unique and stable for
/// later deletion.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A ranked result of a similarity search. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub point_id: String,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    pub payload: ChunkPayload,
}

/// Source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub score: f32,
    pub preview: String,
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerMode {
    /// No usable context; the generator answered from its own knowledge.
    #[serde(rename = "pure-model")]
    PureModel,
    /// Retrieved context was supplied as the authoritative source.
    #[serde(rename = "knowledge-grounded")]
    KnowledgeGrounded,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::PureModel => "pure-model",
            AnswerMode::KnowledgeGrounded => "knowledge-grounded",
        }
    }
}

impl std::fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question and its answer. Lives only for a single request.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub mode: AnswerMode,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub vector_count: usize,
}

/// Knowledge-base counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub document_count: usize,
    pub vector_count: usize,
}
