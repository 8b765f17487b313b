//! # Knowledge RAG
//!
//! A retrieval-augmented question-answering service over a small document
//! knowledge base.
//!
//! Documents are normalized, split into overlapping boundary-aware chunks,
//! embedded, and stored in a vector index. Questions are embedded, matched
//! against the index, and answered by a language model grounded in the
//! retrieved context. When nothing relevant is found, the model answers on
//! its own and the response says so.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌──────────────┐
//! │ txt/md/pdf/  │──▶│  Orchestrator        │──▶│ Qdrant or    │
//! │ docx upload  │   │ normalize→chunk→embed│   │ in-memory    │
//! └──────────────┘   └──────────┬──────────┘   └──────┬───────┘
//!                               │  ask                │
//!                               ▼                     │
//!                    ┌──────────────────────┐         │
//!                    │ context → Generator  │◀────────┘
//!                    └──────────┬───────────┘
//!                      ┌────────┴────────┐
//!                      ▼                 ▼
//!                 ┌──────────┐     ┌───────────┐
//!                 │   CLI    │     │ HTTP + SSE │
//!                 │   (kb)   │     │            │
//!                 └──────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb ingest ./docs                  # ingest a directory of documents
//! kb ask "What is the refund window?"
//! kb ask "Summarize the handbook" --stream
//! kb serve                          # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`extract`] | Text extraction from txt, md, pdf and docx |
//! | [`embedding`] | Ollama and OpenAI embedding backends with retry |
//! | [`generation`] | Ollama answer generation, blocking and streaming |
//! | [`qdrant`] | Qdrant REST similarity index |
//! | [`index`] | Index backend selection with in-memory fallback |
//! | [`catalog`] | In-memory record of committed documents |
//! | [`pipeline`] | The orchestrator tying everything together |
//! | [`server`] | JSON and SSE HTTP API |
//!
//! Pure logic (normalization, chunking, context assembly, the capability
//! traits) lives in the `knowledge-rag-core` crate.

pub mod catalog;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod qdrant;
pub mod server;
