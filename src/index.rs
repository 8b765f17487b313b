//! Similarity-index selection at startup.
//!
//! `index.backend = "qdrant"` connects to Qdrant. If the server cannot be
//! reached, the process keeps running on an [`InMemoryIndex`] and the
//! returned [`OpenedIndex::degraded`] flag is set so the status surface can
//! warn that nothing will survive a restart.

use std::sync::Arc;

use anyhow::{bail, Result};
use knowledge_rag_core::index::memory::InMemoryIndex;
use knowledge_rag_core::index::SimilarityIndex;

use crate::config::IndexConfig;
use crate::qdrant::QdrantIndex;

pub struct OpenedIndex {
    pub index: Arc<dyn SimilarityIndex>,
    /// True when the configured backend was unreachable and the in-memory
    /// fallback is in use.
    pub degraded: bool,
}

pub async fn open_index(config: &IndexConfig) -> Result<OpenedIndex> {
    match config.backend.as_str() {
        "memory" => Ok(OpenedIndex {
            index: Arc::new(InMemoryIndex::with_policy(config.on_dimension_mismatch)),
            degraded: false,
        }),
        "qdrant" => {
            let qdrant = QdrantIndex::new(config)?;
            match qdrant.ping().await {
                Ok(()) => {
                    tracing::info!(url = %config.url, collection = %config.collection, "connected to Qdrant");
                    Ok(OpenedIndex {
                        index: Arc::new(qdrant),
                        degraded: false,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        url = %config.url,
                        error = %e,
                        "Qdrant unreachable; falling back to in-memory index (data will not be persisted)"
                    );
                    Ok(OpenedIndex {
                        index: Arc::new(InMemoryIndex::with_policy(config.on_dimension_mismatch)),
                        degraded: true,
                    })
                }
            }
        }
        other => bail!("Unknown index backend: {}", other),
    }
}
