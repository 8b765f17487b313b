//! HTTP generation backends.
//!
//! [`OllamaGenerator`] calls `POST {url}/api/generate`, either once
//! (`stream: false`) or as a newline-delimited JSON stream. Reasoning text
//! is taken from Ollama's `thinking` field when the model supports it, and
//! otherwise split out of inline `<think>` blocks.
//!
//! Generation is never retried. Transport failures map to
//! [`RagError::GenerationServiceUnavailable`], timeouts to
//! [`RagError::GenerationTimeout`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use knowledge_rag_core::generation::{
    split_thinking, Generation, GenerationStream, Generator, Prompt, StreamEvent, ThinkSplitter,
};
use knowledge_rag_core::RagError;

use crate::config::GenerationConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled ============

/// Generator used when `generation.provider = "disabled"`. Every call fails.
pub struct DisabledGenerator;

fn disabled() -> RagError {
    RagError::GenerationServiceUnavailable("generation provider is disabled".to_string())
}

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<Generation, RagError> {
        Err(disabled())
    }

    async fn generate_stream(&self, _prompt: &Prompt) -> Result<GenerationStream, RagError> {
        Err(disabled())
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
    think: bool,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base.trim_end_matches('/')),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            think: config.think,
        })
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "system": prompt.system,
            "prompt": prompt.user,
            "stream": stream,
        });
        if self.think {
            body["think"] = serde_json::Value::Bool(true);
        }
        body
    }

    fn transport_error(&self, err: &reqwest::Error) -> RagError {
        if err.is_timeout() {
            RagError::GenerationTimeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            RagError::GenerationServiceUnavailable(err.to_string())
        }
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        whole_request: bool,
    ) -> Result<reqwest::Response, RagError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if whole_request {
            request = request.timeout(self.timeout);
        }

        let send = request.send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.transport_error(&e)),
            Err(_) => {
                return Err(RagError::GenerationTimeout {
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationServiceUnavailable(format!(
                "HTTP {}: {}",
                status,
                body_text.trim()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, RagError> {
        let response = self.send(&self.body(prompt, false), true).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(&e))?;

        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(RagError::GenerationServiceUnavailable(err.to_string()));
        }

        let raw = json.get("response").and_then(|r| r.as_str()).unwrap_or("");
        let native_thinking = json
            .get("thinking")
            .and_then(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty());

        Ok(match native_thinking {
            Some(thinking) => Generation {
                answer: raw.trim().to_string(),
                thinking: Some(thinking.to_string()),
            },
            None => split_thinking(raw),
        })
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<GenerationStream, RagError> {
        let response = self.send(&self.body(prompt, true), false).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(ndjson_events(body, self.timeout))
    }
}

/// Parser state for one streamed `/api/generate` response.
struct NdjsonState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    pending: VecDeque<Result<StreamEvent, RagError>>,
    splitter: ThinkSplitter,
    idle_timeout: Duration,
    body_closed: bool,
    finished: bool,
}

impl NdjsonState {
    fn handle_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() || self.finished {
            return;
        }

        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed generation stream line");
                return;
            }
        };

        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            self.pending
                .push_back(Err(RagError::GenerationServiceUnavailable(err.to_string())));
            self.finished = true;
            return;
        }

        if let Some(thinking) = json.get("thinking").and_then(|t| t.as_str()) {
            if !thinking.is_empty() {
                self.pending
                    .push_back(Ok(StreamEvent::Thinking(thinking.to_string())));
            }
        }
        if let Some(delta) = json.get("response").and_then(|r| r.as_str()) {
            self.pending
                .extend(self.splitter.push(delta).into_iter().map(Ok));
        }
        if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
            self.pending
                .extend(self.splitter.finish().into_iter().map(Ok));
            self.pending.push_back(Ok(StreamEvent::Done));
            self.finished = true;
        }
    }
}

/// Turn a raw NDJSON byte stream into [`StreamEvent`]s.
///
/// The stream yields `Done` only when the backend sent `"done": true`; if
/// the body closes first, the stream simply ends so callers can tell a
/// dropped connection from a clean finish.
pub fn ndjson_events(
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    idle_timeout: Duration,
) -> GenerationStream {
    let state = NdjsonState {
        body,
        buf: Vec::new(),
        pending: VecDeque::new(),
        splitter: ThinkSplitter::new(),
        idle_timeout,
        body_closed: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished || state.body_closed {
                return None;
            }

            if let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=pos).collect();
                state.handle_line(&line);
                continue;
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Ok(Some(Ok(bytes))) => state.buf.extend_from_slice(&bytes),
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    let err = if e.is_timeout() {
                        RagError::GenerationTimeout {
                            secs: state.idle_timeout.as_secs(),
                        }
                    } else {
                        RagError::GenerationServiceUnavailable(e.to_string())
                    };
                    return Some((Err(err), state));
                }
                Ok(None) => {
                    let rest = std::mem::take(&mut state.buf);
                    state.handle_line(&rest);
                    state.body_closed = true;
                }
                Err(_) => {
                    state.finished = true;
                    let secs = state.idle_timeout.as_secs();
                    return Some((Err(RagError::GenerationTimeout { secs }), state));
                }
            }
        }
    })
    .boxed()
}

/// Build the [`Generator`] named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_rag_core::generation::build_prompt;

    fn body_from(parts: &[&str]) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        let items: Vec<reqwest::Result<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(items).boxed()
    }

    async fn collect(parts: &[&str]) -> Vec<StreamEvent> {
        ndjson_events(body_from(parts), Duration::from_secs(5))
            .map(|e| e.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_ndjson_lines_split_across_chunks() {
        let events = collect(&[
            "{\"response\":\"Hel\",\"done\":false}\n{\"resp",
            "onse\":\"lo\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hel".into()),
                StreamEvent::Delta("lo".into()),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_without_done_has_no_end_marker() {
        let events = collect(&["{\"response\":\"partial\",\"done\":false}\n"]).await;
        assert_eq!(events, vec![StreamEvent::Delta("partial".into())]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline_is_parsed() {
        let events = collect(&["{\"response\":\"a\",\"done\":true}"]).await;
        assert_eq!(events, vec![StreamEvent::Delta("a".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_native_and_inline_thinking() {
        let events = collect(&[
            "{\"thinking\":\"hmm\",\"response\":\"\",\"done\":false}\n",
            "{\"response\":\"<think>inline</think>ok\",\"done\":true}\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Thinking("hmm".into()),
                StreamEvent::Thinking("inline".into()),
                StreamEvent::Delta("ok".into()),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_error_line_ends_stream_with_error() {
        let mut events =
            ndjson_events(body_from(&["{\"error\":\"model not found\"}\n"]), Duration::from_secs(5));
        let first = events.next().await.unwrap();
        assert!(matches!(first, Err(RagError::GenerationServiceUnavailable(_))));
        assert!(events.next().await.is_none());
    }

    #[test]
    fn test_request_body_includes_system_and_think_flag() {
        let config = GenerationConfig {
            think: true,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let prompt = build_prompt("q", None);
        let body = generator.body(&prompt, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["think"], true);
        assert_eq!(body["system"], prompt.system.as_str());
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let prompt = build_prompt("q", None);
        assert!(DisabledGenerator.generate(&prompt).await.is_err());
        assert!(DisabledGenerator.generate_stream(&prompt).await.is_err());
    }
}
