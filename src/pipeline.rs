//! The retrieval orchestrator: ingestion and question answering.
//!
//! [`Orchestrator`] owns the three external capabilities (embedder,
//! similarity index, generator) behind trait objects, plus the
//! [`DocumentCatalog`]. Each request runs its state machine to completion:
//!
//! ```text
//! ingest: Received → Normalized → Chunked → Embedded → Indexed → Committed
//! ask:    Received → QueryEmbedded → Searched → ContextBuilt | NoContext → Generated → Answered
//! ```
//!
//! A failure carries the stage it could not reach ([`IngestError`],
//! [`AskError`]).
//!
//! # Consistency
//!
//! Ingestion is all-or-nothing: vectors are only upserted once every chunk
//! has been embedded, and a failed upsert is rolled back by document id, so
//! no partial document is ever searchable. The catalog is written last.
//!
//! Ingest, search, and delete share a read gate; clearing the knowledge base
//! takes the write side, so no request observes a half-cleared collection.
//! The gate is released before streaming generation starts.

use std::sync::Arc;

use chrono::Utc;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use knowledge_rag_core::chunk::{self, ChunkParams};
use knowledge_rag_core::context::{assemble, AssembledContext};
use knowledge_rag_core::embedding::Embedder;
use knowledge_rag_core::generation::{build_prompt, GenerationStream, Generator, StreamEvent};
use knowledge_rag_core::index::{CollectionState, SimilarityIndex};
use knowledge_rag_core::models::{
    AnswerMode, Chunk, ChunkPayload, ConversationTurn, Document, DocumentInput, IndexPoint,
    IngestReport, KnowledgeBaseStats, SourceRef,
};
use knowledge_rag_core::normalize::normalize;
use knowledge_rag_core::{AskError, AskStage, IngestError, IngestStage, RagError};

use crate::catalog::{DocumentCatalog, DocumentSummary};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::extract_text;
use crate::generation::create_generator;
use crate::index::open_index;

/// Tunables the orchestrator reads on every request.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk: ChunkParams,
    pub top_k: usize,
    pub score_threshold: f32,
    pub max_context_chars: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk: ChunkParams::default(),
            top_k: 3,
            score_threshold: 0.5,
            max_context_chars: 4000,
            embed_batch_size: 16,
            embed_concurrency: 4,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk: config.chunking.params(),
            top_k: config.retrieval.top_k,
            score_threshold: config.retrieval.score_threshold,
            max_context_chars: config.retrieval.max_context_chars,
            embed_batch_size: config.embedding.batch_size,
            embed_concurrency: config.embedding.concurrency,
        }
    }
}

/// Snapshot of backend wiring, reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub index_backend: String,
    pub persistent: bool,
    /// The configured index was unreachable and the in-memory fallback is in use.
    pub degraded: bool,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub generation_model: String,
    pub document_count: usize,
}

/// One item of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AskEvent {
    Delta(String),
    Thinking(String),
    /// Clean end of the answer, with the metadata the client needs.
    Done {
        mode: AnswerMode,
        sources: Vec<SourceRef>,
    },
}

pub type AskStream = BoxStream<'static, Result<AskEvent, AskError>>;

/// Result of the retrieval half of `ask`.
struct Retrieval {
    context: AssembledContext,
    note: String,
}

pub struct Orchestrator {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    generator: Arc<dyn Generator>,
    catalog: DocumentCatalog,
    settings: PipelineSettings,
    degraded: bool,
    gate: RwLock<()>,
}

impl Orchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            catalog: DocumentCatalog::new(),
            settings,
            degraded: false,
            gate: RwLock::new(()),
        }
    }

    /// Mark the index as the degraded-mode fallback.
    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// Build every backend from configuration and prepare the collection.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let opened = open_index(&config.index).await?;

        let orchestrator = Self::new(
            embedder,
            opened.index,
            generator,
            PipelineSettings::from_config(config),
        )
        .with_degraded(opened.degraded);
        orchestrator.prepare().await?;
        Ok(orchestrator)
    }

    /// Ensure the index collection matches the embedding dimension.
    ///
    /// Does nothing when embeddings are disabled (dimension 0).
    pub async fn prepare(&self) -> Result<Option<CollectionState>, RagError> {
        let dims = self.embedder.dims();
        if dims == 0 {
            return Ok(None);
        }
        let state = self.index.ensure_collection(dims).await?;
        if let CollectionState::Recreated { previous_dims } = state {
            tracing::warn!(previous_dims, dims, "index collection recreated; stored vectors were dropped");
        }
        Ok(Some(state))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // ============ Ingestion ============

    /// Extract text from an uploaded file, then [`ingest`](Self::ingest) it.
    ///
    /// Extraction runs on the blocking pool. An extractor panic is reported
    /// as unsupported content.
    pub async fn ingest_bytes(
        &self,
        filename: String,
        bytes: Vec<u8>,
    ) -> Result<IngestReport, IngestError> {
        let byte_size = bytes.len() as u64;
        let name = filename.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&name, &bytes))
            .await
            .map_err(|e| {
                RagError::UnsupportedContent(format!("extraction of '{}' aborted: {}", filename, e))
            })
            .and_then(|extracted| extracted)
            .map_err(|e| IngestError::new(IngestStage::Normalized, e))?;
        self.ingest(DocumentInput {
            filename,
            byte_size,
            text,
        })
        .await
    }

    pub async fn ingest(&self, input: DocumentInput) -> Result<IngestReport, IngestError> {
        let _gate = self.gate.read().await;
        let document_id = Uuid::new_v4().to_string();
        tracing::debug!(document_id = %document_id, filename = %input.filename, stage = %IngestStage::Received, "ingest");

        let text = normalize(&input.text);
        if text.is_empty() {
            return Err(IngestError::new(
                IngestStage::Normalized,
                RagError::InvalidInput(format!("'{}' contains no text", input.filename)),
            ));
        }
        tracing::debug!(document_id = %document_id, chars = text.chars().count(), stage = %IngestStage::Normalized, "ingest");

        let chunks = chunk::split(&document_id, &text, &self.settings.chunk);
        if chunks.is_empty() {
            return Err(IngestError::new(
                IngestStage::Chunked,
                RagError::InvalidInput(format!("'{}' produced no chunks", input.filename)),
            ));
        }
        tracing::debug!(document_id = %document_id, chunks = chunks.len(), stage = %IngestStage::Chunked, "ingest");

        let vectors = self
            .embed_chunks(&chunks)
            .await
            .map_err(|e| IngestError::new(IngestStage::Embedded, e))?;
        tracing::debug!(document_id = %document_id, vectors = vectors.len(), stage = %IngestStage::Embedded, "ingest");

        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint {
                id: chunk.id.clone(),
                vector,
                payload: ChunkPayload::from_chunk(chunk, &input.filename),
            })
            .collect();

        let ids = match self.index.upsert(points).await {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(rollback) = self.index.delete_by_document(&document_id).await {
                    tracing::warn!(document_id = %document_id, error = %rollback, "rollback after failed upsert did not complete");
                }
                return Err(IngestError::new(IngestStage::Indexed, e));
            }
        };
        tracing::debug!(document_id = %document_id, stage = %IngestStage::Indexed, "ingest");

        let chunk_count = chunks.len();
        let vector_count = ids.len();
        let document = Document {
            id: document_id.clone(),
            filename: input.filename.clone(),
            byte_size: input.byte_size,
            uploaded_at: Utc::now(),
            chunks,
        };
        self.catalog.insert(document, vector_count);

        tracing::info!(
            document_id = %document_id,
            filename = %input.filename,
            chunk_count,
            vector_count,
            "document committed"
        );

        Ok(IngestReport {
            success: true,
            document_id,
            filename: input.filename,
            chunk_count,
            vector_count,
        })
    }

    /// Embed every chunk, batches in flight concurrently, results in chunk order.
    ///
    /// If only some batches fail the error lists which chunk indices
    /// embedded and which did not; if all fail, the backend error is
    /// returned as is.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = self.settings.embed_batch_size.max(1);
        let concurrency = self.settings.embed_concurrency.max(1);
        let embedder = &self.embedder;

        let batches: Vec<(usize, Vec<String>)> = chunks
            .chunks(batch_size)
            .enumerate()
            .map(|(i, batch)| {
                (
                    i * batch_size,
                    batch.iter().map(|c| c.text.clone()).collect(),
                )
            })
            .collect();

        let results: Vec<(usize, usize, Result<Vec<Vec<f32>>, RagError>)> = stream::iter(batches)
            .map(move |(start, texts)| async move {
                let len = texts.len();
                (start, len, embedder.embed_batch(&texts).await)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;

        for (start, len, result) in results {
            match result {
                Ok(batch) if batch.len() == len => {
                    succeeded.extend(start..start + len);
                    vectors.extend(batch);
                }
                Ok(batch) => {
                    failed.extend(start..start + len);
                    first_error.get_or_insert(RagError::EmbeddingServiceUnavailable(format!(
                        "backend returned {} embeddings for {} chunks",
                        batch.len(),
                        len
                    )));
                }
                Err(e) => {
                    tracing::warn!(first_chunk = start, chunks = len, error = %e, "embedding batch failed");
                    failed.extend(start..start + len);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(vectors),
            Some(e) if succeeded.is_empty() => Err(e),
            Some(e) => Err(RagError::PartialIngestFailure {
                succeeded,
                failed,
                reason: e.to_string(),
            }),
        }
    }

    // ============ Question answering ============

    pub async fn ask(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<ConversationTurn, AskError> {
        let question = question.trim();
        let retrieval = self.retrieve(question, top_k).await?;

        let context = (!retrieval.context.is_empty()).then_some(retrieval.context.text.as_str());
        let prompt = build_prompt(question, context);
        let generation = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| AskError::new(AskStage::Generated, e))?;
        tracing::debug!(stage = %AskStage::Generated, mode = %prompt.mode, "ask");

        let thinking = combine_thinking(&retrieval.note, generation.thinking.as_deref());
        tracing::info!(
            mode = %prompt.mode,
            sources = retrieval.context.sources.len(),
            "answered"
        );

        Ok(ConversationTurn {
            question: question.to_string(),
            answer: generation.answer,
            mode: prompt.mode,
            sources: retrieval.context.sources,
            thinking: Some(thinking),
        })
    }

    /// Streaming [`ask`](Self::ask).
    ///
    /// The stream starts with the retrieval note as a `Thinking` event,
    /// then yields generation output in order, and ends with exactly one
    /// `Done`. If the generator stops without its end marker the last item
    /// is an error instead. Dropping the stream releases the backend
    /// connection.
    pub async fn ask_stream(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<AskStream, AskError> {
        let question = question.trim();
        let retrieval = self.retrieve(question, top_k).await?;

        let context = (!retrieval.context.is_empty()).then_some(retrieval.context.text.as_str());
        let prompt = build_prompt(question, context);
        let inner = self
            .generator
            .generate_stream(&prompt)
            .await
            .map_err(|e| AskError::new(AskStage::Generated, e))?;

        let note = stream::once(future::ready(Ok(AskEvent::Thinking(retrieval.note))));
        Ok(note
            .chain(answer_events(inner, prompt.mode, retrieval.context.sources))
            .boxed())
    }

    async fn retrieve(&self, question: &str, top_k: Option<usize>) -> Result<Retrieval, AskError> {
        if question.is_empty() {
            return Err(AskError::new(
                AskStage::Received,
                RagError::InvalidInput("question must not be empty".to_string()),
            ));
        }
        let top_k = top_k.unwrap_or(self.settings.top_k).max(1);
        let threshold = self.settings.score_threshold;
        tracing::debug!(stage = %AskStage::Received, top_k, "ask");

        let _gate = self.gate.read().await;

        let stored = self
            .index
            .count()
            .await
            .map_err(|e| AskError::new(AskStage::Searched, e))?;
        if stored == 0 {
            tracing::debug!(stage = %AskStage::NoContext, "knowledge base is empty");
            return Ok(Retrieval {
                context: AssembledContext::default(),
                note: "The knowledge base is empty; answering from the model's general knowledge."
                    .to_string(),
            });
        }

        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| AskError::new(AskStage::QueryEmbedded, e))?;
        tracing::debug!(stage = %AskStage::QueryEmbedded, "ask");

        let hits = self
            .index
            .search(&query, top_k, Some(threshold))
            .await
            .map_err(|e| AskError::new(AskStage::Searched, e))?;
        tracing::debug!(stage = %AskStage::Searched, hits = hits.len(), "ask");

        let context = assemble(&hits, self.settings.max_context_chars);
        let note = if context.is_empty() {
            tracing::debug!(stage = %AskStage::NoContext, "ask");
            if hits.is_empty() {
                format!(
                    "No document in the knowledge base scored at or above {:.2} for this question; answering from the model's general knowledge.",
                    threshold
                )
            } else {
                "Matching fragments were found but none fit within the context limit; answering from the model's general knowledge.".to_string()
            }
        } else {
            tracing::debug!(stage = %AskStage::ContextBuilt, sources = context.sources.len(), "ask");
            let scores = context.sources.iter().map(|s| s.score);
            let min = scores.clone().fold(f32::INFINITY, f32::min);
            let max = scores.fold(f32::NEG_INFINITY, f32::max);
            format!(
                "Found {} relevant fragment(s) in the knowledge base (similarity {:.3}-{:.3}); answering from these documents.",
                context.sources.len(),
                min,
                max
            )
        };

        Ok(Retrieval { context, note })
    }

    // ============ Maintenance ============

    /// Remove a document's vectors and catalog entry. Returns vectors removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize, RagError> {
        let _gate = self.gate.read().await;
        let removed = self.index.delete_by_document(document_id).await?;
        let known = self.catalog.remove(document_id).is_some();
        if !known && removed == 0 {
            return Err(RagError::DocumentNotFound(document_id.to_string()));
        }
        tracing::info!(document_id, vectors = removed, "document deleted");
        Ok(removed)
    }

    /// Drop every vector and catalog entry.
    pub async fn clear_knowledge_base(&self) -> Result<(), RagError> {
        let _gate = self.gate.write().await;
        self.index.clear_all().await?;
        self.catalog.clear();
        tracing::info!("knowledge base cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<KnowledgeBaseStats, RagError> {
        let _gate = self.gate.read().await;
        Ok(KnowledgeBaseStats {
            document_count: self.catalog.len(),
            vector_count: self.index.count().await?,
        })
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.catalog.list()
    }

    pub fn document(&self, document_id: &str) -> Option<DocumentSummary> {
        self.catalog.get(document_id)
    }

    /// The chunk text stored at ingestion for a search hit's coordinates.
    pub fn chunk(&self, document_id: &str, chunk_index: usize) -> Option<Chunk> {
        self.catalog.chunk(document_id, chunk_index)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            index_backend: self.index.backend_name().to_string(),
            persistent: self.index.is_persistent(),
            degraded: self.degraded,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
            generation_model: self.generator.model_name().to_string(),
            document_count: self.catalog.len(),
        }
    }
}

fn combine_thinking(note: &str, model_thinking: Option<&str>) -> String {
    match model_thinking {
        Some(t) if !t.trim().is_empty() => format!("{}\n\nModel reasoning:\n{}", note, t.trim()),
        _ => note.to_string(),
    }
}

struct AnswerState {
    inner: GenerationStream,
    mode: AnswerMode,
    sources: Vec<SourceRef>,
    finished: bool,
}

/// Map generator events to [`AskEvent`]s, enforcing the end marker.
fn answer_events(
    inner: GenerationStream,
    mode: AnswerMode,
    sources: Vec<SourceRef>,
) -> impl futures::Stream<Item = Result<AskEvent, AskError>> + Send + 'static {
    let state = AnswerState {
        inner,
        mode,
        sources,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        let item = match state.inner.next().await {
            Some(Ok(StreamEvent::Delta(text))) => Ok(AskEvent::Delta(text)),
            Some(Ok(StreamEvent::Thinking(text))) => Ok(AskEvent::Thinking(text)),
            Some(Ok(StreamEvent::Done)) => {
                state.finished = true;
                tracing::info!(mode = %state.mode, sources = state.sources.len(), "answered (stream)");
                Ok(AskEvent::Done {
                    mode: state.mode,
                    sources: std::mem::take(&mut state.sources),
                })
            }
            Some(Err(e)) => {
                state.finished = true;
                Err(AskError::new(AskStage::Generated, e))
            }
            None => {
                state.finished = true;
                Err(AskError::new(
                    AskStage::Generated,
                    RagError::GenerationServiceUnavailable(
                        "generation stream ended before completion".to_string(),
                    ),
                ))
            }
        };
        Some((item, state))
    })
}
