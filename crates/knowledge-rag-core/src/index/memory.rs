//! In-memory [`SimilarityIndex`] for tests and degraded mode.
//!
//! Points live in a `Vec` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over every stored vector. Nothing is persisted.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RagError;
use crate::models::{ChunkPayload, IndexPoint, SearchHit};

use super::{finalize_hits, CollectionState, DimensionPolicy, SimilarityIndex};

struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Default)]
struct Collection {
    dims: Option<usize>,
    points: Vec<StoredPoint>,
}

/// Linear-scan, non-persistent similarity index.
pub struct InMemoryIndex {
    policy: DimensionPolicy,
    collection: RwLock<Collection>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::with_policy(DimensionPolicy::default())
    }

    pub fn with_policy(policy: DimensionPolicy) -> Self {
        Self {
            policy,
            collection: RwLock::new(Collection::default()),
        }
    }

    /// Dimension the collection was created with, if any.
    pub fn dims(&self) -> Option<usize> {
        self.read().ok().and_then(|c| c.dims)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collection>, RagError> {
        self.collection
            .read()
            .map_err(|_| RagError::Index("in-memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collection>, RagError> {
        self.collection
            .write()
            .map_err(|_| RagError::Index("in-memory index lock poisoned".to_string()))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn ensure_collection(&self, dims: usize) -> Result<CollectionState, RagError> {
        let mut collection = self.write()?;
        match collection.dims {
            None => {
                collection.dims = Some(dims);
                Ok(CollectionState::Created)
            }
            Some(existing) if existing == dims => Ok(CollectionState::Existing),
            Some(existing) => match self.policy {
                DimensionPolicy::Recreate => {
                    collection.points.clear();
                    collection.dims = Some(dims);
                    Ok(CollectionState::Recreated {
                        previous_dims: existing,
                    })
                }
                DimensionPolicy::Reject => Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: existing,
                }),
            },
        }
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<Vec<String>, RagError> {
        let mut collection = self.write()?;

        let expected = match (collection.dims, points.first()) {
            (Some(d), _) => d,
            (None, Some(p)) => p.vector.len(),
            (None, None) => return Ok(Vec::new()),
        };
        if let Some(bad) = points.iter().find(|p| p.vector.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }
        collection.dims = Some(expected);

        let mut ids = Vec::with_capacity(points.len());
        for point in points {
            collection.points.retain(|sp| sp.id != point.id);
            ids.push(point.id.clone());
            collection.points.push(StoredPoint {
                id: point.id,
                vector: point.vector,
                payload: point.payload,
            });
        }
        Ok(ids)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let collection = self.read()?;
        if let Some(dims) = collection.dims {
            if query.len() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: query.len(),
                });
            }
        }

        let hits: Vec<SearchHit> = collection
            .points
            .iter()
            .map(|sp| SearchHit {
                point_id: sp.id.clone(),
                score: cosine_similarity(query, &sp.vector),
                rank: 0,
                payload: sp.payload.clone(),
            })
            .collect();

        Ok(finalize_hits(hits, top_k, score_threshold))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, RagError> {
        let mut collection = self.write()?;
        let before = collection.points.len();
        collection
            .points
            .retain(|sp| sp.payload.document_id != document_id);
        Ok(before - collection.points.len())
    }

    async fn clear_all(&self) -> Result<(), RagError> {
        self.write()?.points.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.read()?.points.len())
    }
}
