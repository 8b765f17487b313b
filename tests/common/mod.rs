//! Deterministic backends shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use knowledge_rag::pipeline::{Orchestrator, PipelineSettings};
use knowledge_rag_core::embedding::Embedder;
use knowledge_rag_core::generation::{Generation, GenerationStream, Generator, Prompt, StreamEvent};
use knowledge_rag_core::index::memory::InMemoryIndex;
use knowledge_rag_core::index::SimilarityIndex;
use knowledge_rag_core::RagError;

pub const VOCABULARY: [&str; 4] = ["rust", "python", "kubernetes", "cooking"];

/// Embeds text as keyword counts over [`VOCABULARY`], plus a small constant
/// component so no vector is all zeros.
pub struct KeywordEmbedder {
    /// Any batch containing this word fails.
    pub poison: Option<&'static str>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self { poison: None }
    }

    pub fn poisoned(word: &'static str) -> Self {
        Self { poison: Some(word) }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCABULARY
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(0.05);
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if let Some(poison) = self.poison {
            if texts.iter().any(|t| t.contains(poison)) {
                return Err(RagError::EmbeddingServiceUnavailable(
                    "connection reset".to_string(),
                ));
            }
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Embeds through a plain function, for tests that need exact similarities.
pub struct FnEmbedder {
    pub dims: usize,
    pub f: fn(&str) -> Vec<f32>,
}

#[async_trait]
impl Embedder for FnEmbedder {
    fn model_name(&self) -> &str {
        "fn-test"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| (self.f)(t)).collect())
    }
}

/// Records every prompt and answers with a fixed, mode-tagged text.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<Prompt>>,
    /// Streams end without their `Done` marker.
    pub cut_off: bool,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cut_off() -> Self {
        Self {
            cut_off: true,
            ..Self::default()
        }
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn record(&self, prompt: &Prompt) {
        self.prompts.lock().unwrap().push(prompt.clone());
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording-test"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, RagError> {
        self.record(prompt);
        Ok(Generation {
            answer: format!("answer ({})", prompt.mode),
            thinking: Some("checked the sources".to_string()),
        })
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<GenerationStream, RagError> {
        self.record(prompt);
        let mut events = vec![
            Ok(StreamEvent::Delta("ans".to_string())),
            Ok(StreamEvent::Delta("wer".to_string())),
        ];
        if !self.cut_off {
            events.push(Ok(StreamEvent::Done));
        }
        Ok(stream::iter(events).boxed())
    }
}

/// Generator backend that is always down.
pub struct DownGenerator;

#[async_trait]
impl Generator for DownGenerator {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<Generation, RagError> {
        Err(RagError::GenerationServiceUnavailable(
            "connection refused (os error 111)".to_string(),
        ))
    }

    async fn generate_stream(&self, _prompt: &Prompt) -> Result<GenerationStream, RagError> {
        Err(RagError::GenerationTimeout { secs: 120 })
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub index: Arc<InMemoryIndex>,
    pub generator: Arc<RecordingGenerator>,
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        embed_batch_size: 1,
        ..PipelineSettings::default()
    }
}

/// Keyword embedder, in-memory index, recording generator.
pub fn harness() -> Harness {
    harness_with(
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingGenerator::new()),
        settings(),
    )
}

pub fn harness_with(
    embedder: Arc<dyn Embedder>,
    generator: Arc<RecordingGenerator>,
    settings: PipelineSettings,
) -> Harness {
    let index = Arc::new(InMemoryIndex::new());
    let orchestrator = Orchestrator::new(
        embedder,
        index.clone() as Arc<dyn SimilarityIndex>,
        generator.clone() as Arc<dyn Generator>,
        settings,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        index,
        generator,
    }
}
