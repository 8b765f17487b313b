//! Answer generation capability and prompt construction.
//!
//! [`Generator`] is the narrow interface to a text-generation backend:
//! one-shot [`generate`](Generator::generate) and incremental
//! [`generate_stream`](Generator::generate_stream). Both receive the same
//! [`Prompt`], built by [`build_prompt`], so the pure-model versus
//! knowledge-grounded labelling is identical for either call.
//!
//! Generation is never retried automatically: a second attempt is as
//! expensive as the first and may produce a different answer.

pub mod thinking;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RagError;
use crate::models::AnswerMode;

pub use thinking::{split_thinking, ThinkSplitter};

/// A fully built prompt, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub mode: AnswerMode,
    pub system: String,
    pub user: String,
}

/// A complete answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub answer: String,
    /// Reasoning trace, when the backend produced one.
    pub thinking: Option<String>,
}

/// One item of a streamed answer.
///
/// A well-formed stream is any number of `Delta`/`Thinking` items in
/// generation order followed by exactly one `Done`. A stream that ends
/// without `Done` was cut off.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Thinking(String),
    Done,
}

/// Stream of generation events. Dropping it releases the backend connection.
pub type GenerationStream = BoxStream<'static, Result<StreamEvent, RagError>>;

/// Text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"qwen2.5:14b"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, RagError>;

    async fn generate_stream(&self, prompt: &Prompt) -> Result<GenerationStream, RagError>;
}

const GROUNDED_SYSTEM: &str = "You are a knowledge-base assistant. The context provided below \
was retrieved from the user's documents and is the authoritative source for this answer. \
Answer using only that context and refer to it by its [Source N] markers. If the context does \
not contain the answer, say so plainly; do not fill the gap with outside knowledge you cannot \
verify from the context.";

const PURE_MODEL_SYSTEM: &str = "You are a helpful assistant. No documents in the user's \
knowledge base matched this question, so answer from your general knowledge. Begin your answer \
by stating that it is not based on the knowledge base.";

/// Build the prompt for a question.
///
/// `context` that is `None` or blank selects [`AnswerMode::PureModel`];
/// anything else selects [`AnswerMode::KnowledgeGrounded`].
///
/// # Example
///
/// ```rust
/// use knowledge_rag_core::generation::build_prompt;
/// use knowledge_rag_core::models::AnswerMode;
///
/// assert_eq!(build_prompt("Why?", None).mode, AnswerMode::PureModel);
/// assert_eq!(
///     build_prompt("Why?", Some("[Source 1: a.txt #0]\nBecause.")).mode,
///     AnswerMode::KnowledgeGrounded
/// );
/// ```
pub fn build_prompt(question: &str, context: Option<&str>) -> Prompt {
    let question = question.trim();
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(ctx) => Prompt {
            mode: AnswerMode::KnowledgeGrounded,
            system: GROUNDED_SYSTEM.to_string(),
            user: format!("Context:\n{}\n\nQuestion: {}\n\nAnswer:", ctx, question),
        },
        None => Prompt {
            mode: AnswerMode::PureModel,
            system: PURE_MODEL_SYSTEM.to_string(),
            user: format!("Question: {}\n\nAnswer:", question),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grounded_prompt_contains_context_and_authority() {
        let p = build_prompt("  What is X? ", Some("[Source 1: x.md #0]\nX is a letter."));
        assert_eq!(p.mode, AnswerMode::KnowledgeGrounded);
        assert!(p.user.contains("X is a letter."));
        assert!(p.user.contains("Question: What is X?"));
        assert!(p.system.contains("authoritative"));
        assert!(p.system.contains("outside knowledge"));
    }

    #[test]
    fn test_blank_context_is_pure_model() {
        let p = build_prompt("What is X?", Some("   "));
        assert_eq!(p.mode, AnswerMode::PureModel);
        assert!(p.system.contains("not based on the knowledge base"));
        assert!(!p.user.contains("Context:"));
    }
}
