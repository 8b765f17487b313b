//! In-memory record of committed documents.
//!
//! The catalog is written only at the `Committed` step of ingestion, so a
//! document listed here is fully searchable. It keeps each document's
//! chunks so a search hit's `(document_id, chunk_index)` can be resolved
//! back to the exact text stored at ingestion.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use knowledge_rag_core::models::{Chunk, Document};

/// Listing entry for one committed document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub vector_count: usize,
}

struct Entry {
    document: Document,
    vector_count: usize,
}

impl Entry {
    fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.document.id.clone(),
            filename: self.document.filename.clone(),
            byte_size: self.document.byte_size,
            uploaded_at: self.document.uploaded_at,
            chunk_count: self.document.chunks.len(),
            vector_count: self.vector_count,
        }
    }
}

#[derive(Default)]
pub struct DocumentCatalog {
    entries: RwLock<HashMap<String, Entry>>,
}

impl DocumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single map operation; poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, document: Document, vector_count: usize) -> DocumentSummary {
        let entry = Entry {
            document,
            vector_count,
        };
        let summary = entry.summary();
        self.write().insert(summary.id.clone(), entry);
        summary
    }

    pub fn remove(&self, id: &str) -> Option<DocumentSummary> {
        self.write().remove(id).map(|e| e.summary())
    }

    pub fn get(&self, id: &str) -> Option<DocumentSummary> {
        self.read().get(id).map(Entry::summary)
    }

    /// The chunk stored for `(id, chunk_index)` at ingestion.
    pub fn chunk(&self, id: &str, chunk_index: usize) -> Option<Chunk> {
        self.read()
            .get(id)
            .and_then(|e| e.document.chunks.get(chunk_index).cloned())
    }

    /// All documents, newest first.
    pub fn list(&self) -> Vec<DocumentSummary> {
        let mut docs: Vec<DocumentSummary> = self.read().values().map(Entry::summary).collect();
        docs.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        docs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}
