//! # Knowledge RAG Core
//!
//! Shared, WASM-safe logic for Knowledge RAG: data models, text
//! normalization, boundary-aware chunking, the embedding / similarity-index /
//! generation capability traits, an in-process similarity index, and context
//! assembly.
//!
//! This crate contains no tokio, HTTP clients, filesystem I/O, or other
//! native-only dependencies. Concrete backends (Ollama, OpenAI, Qdrant) live
//! in the `knowledge-rag` app crate and plug in behind the traits defined
//! here.
//!
//! ## Data flow
//!
//! ```text
//! ingest: raw text ─▶ normalize ─▶ chunk ─▶ Embedder ─▶ SimilarityIndex::upsert
//! ask:    question ─▶ Embedder ─▶ SimilarityIndex::search ─▶ context::assemble ─▶ Generator
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod normalize;

pub use error::{AskError, AskStage, IngestError, IngestStage, RagError};
