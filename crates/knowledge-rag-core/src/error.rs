//! Error taxonomy for the retrieval pipeline.
//!
//! [`RagError`] classifies every failure the pipeline can surface. The
//! orchestrator wraps it in a stage-tagged [`IngestError`] or [`AskError`]
//! so callers (and logs) can see exactly which state a request failed in.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Every failure the chunking, retrieval, and answer pipeline can report.
///
/// Variants never carry raw backend error objects, only messages, so
/// external-service internals do not leak past the orchestrator boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    /// Input that is not text (binary content, unknown file type).
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    #[error("embedding service timed out after {secs}s")]
    EmbeddingTimeout { secs: u64 },

    /// Collection or vector dimension disagrees with the embedding model.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("generation service unavailable: {0}")]
    GenerationServiceUnavailable(String),

    #[error("generation service timed out after {secs}s")]
    GenerationTimeout { secs: u64 },

    /// The vector database could not be reached.
    #[error("similarity index unavailable: {0}")]
    IndexUnavailable(String),

    /// Some chunks of a document failed to embed; nothing was indexed.
    #[error(
        "ingestion rolled back: {} chunk(s) embedded, {} failed ({reason})",
        .succeeded.len(),
        .failed.len()
    )]
    PartialIngestFailure {
        succeeded: Vec<usize>,
        failed: Vec<usize>,
        reason: String,
    },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other similarity-index fault (bad response, rejected request).
    #[error("similarity index error: {0}")]
    Index(String),
}

impl RagError {
    /// True for failures caused by an unreachable or slow external service.
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingServiceUnavailable(_)
                | RagError::EmbeddingTimeout { .. }
                | RagError::GenerationServiceUnavailable(_)
                | RagError::GenerationTimeout { .. }
                | RagError::IndexUnavailable(_)
        )
    }

    /// Transient embedding failures are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingServiceUnavailable(_) | RagError::EmbeddingTimeout { .. }
        )
    }

    /// Machine-readable code used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::UnsupportedContent(_) => "unsupported_content",
            RagError::EmbeddingServiceUnavailable(_)
            | RagError::EmbeddingTimeout { .. }
            | RagError::GenerationServiceUnavailable(_)
            | RagError::GenerationTimeout { .. }
            | RagError::IndexUnavailable(_) => "service_unavailable",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::PartialIngestFailure { .. } => "partial_ingest_failure",
            RagError::DocumentNotFound(_) => "not_found",
            RagError::InvalidInput(_) => "bad_request",
            RagError::Index(_) => "index_error",
        }
    }
}

/// States of a single ingestion request.
///
/// `Received → Normalized → Chunked → Embedded → Indexed → Committed`.
/// An [`IngestError`] records the state that could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    Normalized,
    Chunked,
    Embedded,
    Indexed,
    Committed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Received => "received",
            IngestStage::Normalized => "normalized",
            IngestStage::Chunked => "chunked",
            IngestStage::Embedded => "embedded",
            IngestStage::Indexed => "indexed",
            IngestStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// States of a single question-answering request.
///
/// `Received → QueryEmbedded → Searched → (ContextBuilt | NoContext) →
/// Generated → Answered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AskStage {
    Received,
    QueryEmbedded,
    Searched,
    ContextBuilt,
    NoContext,
    Generated,
    Answered,
}

impl fmt::Display for AskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AskStage::Received => "received",
            AskStage::QueryEmbedded => "query_embedded",
            AskStage::Searched => "searched",
            AskStage::ContextBuilt => "context_built",
            AskStage::NoContext => "no_context",
            AskStage::Generated => "generated",
            AskStage::Answered => "answered",
        };
        f.write_str(name)
    }
}

/// An ingestion that failed, tagged with the state it failed to reach.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("ingest failed at stage '{stage}': {error}")]
pub struct IngestError {
    pub stage: IngestStage,
    #[source]
    pub error: RagError,
}

impl IngestError {
    pub fn new(stage: IngestStage, error: RagError) -> Self {
        Self { stage, error }
    }
}

/// A question that failed, tagged with the state it failed to reach.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("ask failed at stage '{stage}': {error}")]
pub struct AskError {
    pub stage: AskStage,
    #[source]
    pub error: RagError,
}

impl AskError {
    pub fn new(stage: AskStage, error: RagError) -> Self {
        Self { stage, error }
    }
}
