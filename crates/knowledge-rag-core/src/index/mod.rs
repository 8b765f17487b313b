//! Similarity-index abstraction for Knowledge RAG.
//!
//! The [`SimilarityIndex`] trait is the narrow capability the pipeline
//! needs from a vector database: ensure a collection, upsert points,
//! nearest-neighbor search, delete by document, and clear. Backends:
//!
//! - [`memory::InMemoryIndex`]: linear-scan cosine similarity, not
//!   persistent. Used directly in tests and as the degraded-mode fallback
//!   when the configured vector database is unreachable at startup.
//! - `QdrantIndex` in the app crate: the Qdrant REST API.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RagError;
use crate::models::{IndexPoint, SearchHit};

/// What to do when an existing collection was created with a different
/// vector dimension than the embedding model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionPolicy {
    /// Drop and recreate the collection. Destroys every stored vector.
    #[default]
    Recreate,
    /// Refuse with [`RagError::DimensionMismatch`] and leave the collection untouched.
    Reject,
}

/// Outcome of [`SimilarityIndex::ensure_collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Created,
    Existing,
    /// The collection had the wrong dimension and was rebuilt empty.
    Recreated { previous_dims: usize },
}

/// Abstract nearest-neighbor service.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](SimilarityIndex::ensure_collection) | Create or reconcile the collection (idempotent) |
/// | [`upsert`](SimilarityIndex::upsert) | Store vectors with chunk payloads |
/// | [`search`](SimilarityIndex::search) | Ranked cosine search with optional threshold |
/// | [`delete_by_document`](SimilarityIndex::delete_by_document) | Remove every point of one document |
/// | [`clear_all`](SimilarityIndex::clear_all) | Drop all points |
/// | [`count`](SimilarityIndex::count) | Number of stored points |
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Short backend identifier (`"memory"`, `"qdrant"`).
    fn backend_name(&self) -> &str;

    /// False when stored vectors do not survive a restart.
    fn is_persistent(&self) -> bool;

    /// Make sure a collection for `dims`-dimensional vectors exists.
    async fn ensure_collection(&self, dims: usize) -> Result<CollectionState, RagError>;

    /// Insert or replace points. Either every point is stored or none is.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<Vec<String>, RagError>;

    /// Return up to `top_k` hits in descending score order, keeping only
    /// scores `>= score_threshold` when one is given.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, RagError>;

    /// Remove every point whose payload belongs to `document_id`, in one
    /// operation. Returns the number of points removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, RagError>;

    /// Remove every point. The collection stays usable with its current dimension.
    async fn clear_all(&self) -> Result<(), RagError>;

    async fn count(&self) -> Result<usize, RagError>;
}

/// Sort, threshold, truncate, and rank raw scored hits.
///
/// Shared by every backend so ordering and rank numbering are identical
/// regardless of where the scores came from.
pub fn finalize_hits(
    mut hits: Vec<SearchHit>,
    top_k: usize,
    score_threshold: Option<f32>,
) -> Vec<SearchHit> {
    if let Some(threshold) = score_threshold {
        hits.retain(|h| h.score >= threshold);
    }
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.payload.document_id.cmp(&b.payload.document_id))
            .then_with(|| a.payload.chunk_index.cmp(&b.payload.chunk_index))
    });
    hits.truncate(top_k);
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkPayload;

    fn hit(doc: &str, idx: usize, score: f32) -> SearchHit {
        SearchHit {
            point_id: format!("{}-{}", doc, idx),
            score,
            rank: 0,
            payload: ChunkPayload {
                document_id: doc.to_string(),
                filename: format!("{}.txt", doc),
                chunk_index: idx,
                start: 0,
                end: 1,
                text: String::new(),
            },
        }
    }

    #[test]
    fn test_finalize_orders_and_ranks() {
        let hits = vec![hit("a", 0, 0.2), hit("b", 0, 0.9), hit("c", 0, 0.5)];
        let ranked = finalize_hits(hits, 10, None);
        let scores: Vec<f32> = ranked.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
        let ranks: Vec<usize> = ranked.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_finalize_threshold_and_truncate() {
        let hits = vec![hit("a", 0, 0.95), hit("b", 0, 0.91), hit("c", 0, 0.4)];
        let ranked = finalize_hits(hits, 1, Some(0.9));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].payload.document_id, "a");
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        let p: DimensionPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(p, DimensionPolicy::Reject);
        assert_eq!(DimensionPolicy::default(), DimensionPolicy::Recreate);
    }
}
