//! HTTP embedding backends.
//!
//! Implementations of [`Embedder`] for the services the `kb` binary can
//! talk to:
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama server.
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings` on the OpenAI API.
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are off.
//!
//! Use [`create_embedder`] to build the one named in the configuration.
//!
//! # Retry Strategy
//!
//! Both HTTP backends share [`post_json_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Once retries are exhausted the last failure is surfaced as
//! [`RagError::EmbeddingServiceUnavailable`] or [`RagError::EmbeddingTimeout`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use knowledge_rag_core::embedding::Embedder;
use knowledge_rag_core::RagError;

use crate::config::EmbeddingConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Bounded exponential backoff for transient embedding failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt up to 2^5 times this.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Translate a transport failure into the embedding error taxonomy.
fn transport_error(err: &reqwest::Error, timeout_secs: u64) -> RagError {
    if err.is_timeout() {
        RagError::EmbeddingTimeout { secs: timeout_secs }
    } else {
        RagError::EmbeddingServiceUnavailable(err.to_string())
    }
}

/// POST a JSON body, retrying on 429/5xx and transport errors.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    policy: RetryPolicy,
    timeout_secs: u64,
) -> Result<serde_json::Value, RagError> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            tracing::warn!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_err.as_ref().map(ToString::to_string).unwrap_or_default(),
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        RagError::EmbeddingServiceUnavailable(format!(
                            "invalid response body: {}",
                            e
                        ))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = RagError::EmbeddingServiceUnavailable(format!(
                    "HTTP {}: {}",
                    status,
                    body_text.trim()
                ));

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                // Client error (not 429): fail now
                return Err(err);
            }
            Err(e) => {
                last_err = Some(transport_error(&e, timeout_secs));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        RagError::EmbeddingServiceUnavailable("embedding failed after retries".to_string())
    }))
}

/// Check a backend response against the request and the model dimension.
fn check_vectors(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, RagError> {
    if vectors.len() != expected_count {
        return Err(RagError::EmbeddingServiceUnavailable(format!(
            "backend returned {} embeddings for {} inputs",
            vectors.len(),
            expected_count
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ Disabled ============

/// Embedder used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::EmbeddingServiceUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama ============

/// Embedder backed by Ollama's batch endpoint `POST /api/embed`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    batch_size: usize,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.retry,
            self.timeout_secs,
        )
        .await?;

        let vectors = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::EmbeddingServiceUnavailable(
                    "invalid Ollama response: missing embeddings array".to_string(),
                )
            })?
            .iter()
            .map(parse_vector)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                RagError::EmbeddingServiceUnavailable(
                    "invalid Ollama response: embedding is not an array".to_string(),
                )
            })?;

        check_vectors(vectors, texts.len(), self.dims)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.retry,
            self.timeout_secs,
        )
        .await?;

        check_vectors(parse_openai_response(&json)?, texts.len(), self.dims)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RagError> {
    let invalid = |what: &str| {
        RagError::EmbeddingServiceUnavailable(format!("invalid OpenAI response: {}", what))
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = item
            .get("embedding")
            .and_then(parse_vector)
            .ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Build the [`Embedder`] named by `embedding.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(policy.delay(4), Duration::from_millis(80));
        assert_eq!(policy.delay(9), Duration::from_millis(320));
    }

    #[test]
    fn test_openai_response_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_check_vectors_rejects_wrong_dimension() {
        let err = check_vectors(vec![vec![1.0, 2.0, 3.0]], 1, 2).unwrap_err();
        assert_eq!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert!(check_vectors(vec![vec![1.0]], 2, 1).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let err = DisabledEmbedder.embed("hello").await.unwrap_err();
        assert!(err.is_service_unavailable());
    }

    #[test]
    fn test_create_embedder_by_name() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_embedder(&config).unwrap().model_name(), "disabled");

        let config = EmbeddingConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "bge-m3");
        assert_eq!(embedder.dims(), 1024);
    }
}
