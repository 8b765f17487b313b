//! Qdrant REST adapter for [`SimilarityIndex`].
//!
//! One collection holds every chunk vector, with cosine distance and the
//! [`ChunkPayload`] stored as point payload. A keyword payload index on
//! `document_id` keeps per-document deletes cheap.
//!
//! # Endpoints used
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `GET /collections` |
//! | ensure collection | `GET`, `PUT`, `DELETE /collections/{name}` |
//! | payload index | `PUT /collections/{name}/index` |
//! | upsert | `PUT /collections/{name}/points?wait=true`, once per batch |
//! | search | `POST /collections/{name}/points/search` |
//! | delete by document | `POST /collections/{name}/points/delete?wait=true` |
//! | count | `POST /collections/{name}/points/count` |
//!
//! Transport failures become [`RagError::IndexUnavailable`]; error
//! statuses become [`RagError::Index`].

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use knowledge_rag_core::index::{finalize_hits, CollectionState, DimensionPolicy, SimilarityIndex};
use knowledge_rag_core::models::{ChunkPayload, IndexPoint, SearchHit};
use knowledge_rag_core::RagError;

use crate::config::IndexConfig;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    policy: DimensionPolicy,
    upsert_batch_size: usize,
    /// Vector size of the collection; 0 until `ensure_collection` ran.
    dims: AtomicUsize,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            policy: config.on_dimension_mismatch,
            upsert_batch_size: config.upsert_batch_size.max(1),
            dims: AtomicUsize::new(0),
        })
    }

    /// Cheap reachability check.
    pub async fn ping(&self) -> Result<(), RagError> {
        self.call(Method::GET, "/collections", None).await.map(|_| ())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), RagError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("{}: {}", url, e)))?;
        let status = response.status();
        let json = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, json))
    }

    /// Like [`call`](Self::call), but any non-2xx status is an error.
    async fn call_ok(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RagError> {
        let (status, json) = self.call(method, path, body).await?;
        if !status.is_success() {
            let detail = json
                .pointer("/status/error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| json.to_string());
            return Err(RagError::Index(format!("Qdrant {} on {}: {}", status, path, detail)));
        }
        Ok(json)
    }

    fn collection_path(&self) -> String {
        format!("/collections/{}", self.collection)
    }

    /// Vector size of the existing collection, `None` if it does not exist.
    async fn existing_dims(&self) -> Result<Option<usize>, RagError> {
        let (status, json) = self.call(Method::GET, &self.collection_path(), None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RagError::Index(format!(
                "Qdrant {} reading collection '{}'",
                status, self.collection
            )));
        }
        json.pointer("/result/config/params/vectors/size")
            .and_then(|s| s.as_u64())
            .map(|s| Some(s as usize))
            .ok_or_else(|| {
                RagError::Index(format!(
                    "collection '{}' does not use a single unnamed vector",
                    self.collection
                ))
            })
    }

    async fn create_collection(&self, dims: usize) -> Result<(), RagError> {
        let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
        self.call_ok(Method::PUT, &self.collection_path(), Some(&body))
            .await?;

        let index = json!({ "field_name": "document_id", "field_schema": "keyword" });
        let path = format!("{}/index?wait=true", self.collection_path());
        self.call_ok(Method::PUT, &path, Some(&index)).await?;

        tracing::info!(collection = %self.collection, dims, "created Qdrant collection");
        Ok(())
    }

    async fn drop_collection(&self) -> Result<(), RagError> {
        let (status, _) = self
            .call(Method::DELETE, &self.collection_path(), None)
            .await?;
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(RagError::Index(format!(
                "Qdrant {} deleting collection '{}'",
                status, self.collection
            )));
        }
        Ok(())
    }

    fn document_filter(document_id: &str) -> Value {
        json!({ "must": [ { "key": "document_id", "match": { "value": document_id } } ] })
    }

    async fn count_matching(&self, filter: Option<Value>) -> Result<usize, RagError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let path = format!("{}/points/count", self.collection_path());
        let (status, json) = self.call(Method::POST, &path, Some(&body)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(RagError::Index(format!("Qdrant {} counting points", status)));
        }
        Ok(json
            .pointer("/result/count")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as usize)
    }
}

fn point_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    fn backend_name(&self) -> &str {
        "qdrant"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn ensure_collection(&self, dims: usize) -> Result<CollectionState, RagError> {
        let state = match self.existing_dims().await? {
            None => {
                self.create_collection(dims).await?;
                CollectionState::Created
            }
            Some(existing) if existing == dims => CollectionState::Existing,
            Some(existing) => match self.policy {
                DimensionPolicy::Recreate => {
                    tracing::warn!(
                        collection = %self.collection,
                        previous = existing,
                        dims,
                        "collection dimension differs from embedding model; recreating (all vectors dropped)"
                    );
                    self.drop_collection().await?;
                    self.create_collection(dims).await?;
                    CollectionState::Recreated {
                        previous_dims: existing,
                    }
                }
                DimensionPolicy::Reject => {
                    return Err(RagError::DimensionMismatch {
                        expected: dims,
                        actual: existing,
                    })
                }
            },
        };
        self.dims.store(dims, Ordering::SeqCst);
        Ok(state)
    }

    /// Points go out in batches of `upsert_batch_size`. A failed batch
    /// returns its error with earlier batches already stored; the caller
    /// rolls back by document id.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<Vec<String>, RagError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let dims = self.dims.load(Ordering::SeqCst);
        if dims > 0 {
            if let Some(bad) = points.iter().find(|p| p.vector.len() != dims) {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: bad.vector.len(),
                });
            }
        }

        let mut ids = Vec::with_capacity(points.len());
        let mut wire = Vec::with_capacity(points.len());
        for point in points {
            let payload = serde_json::to_value(&point.payload)
                .map_err(|e| RagError::Index(format!("payload encoding failed: {}", e)))?;
            wire.push(json!({ "id": point.id, "vector": point.vector, "payload": payload }));
            ids.push(point.id);
        }

        let path = format!("{}/points?wait=true", self.collection_path());
        for (n, batch) in wire.chunks(self.upsert_batch_size).enumerate() {
            self.call_ok(Method::PUT, &path, Some(&json!({ "points": batch })))
                .await?;
            tracing::trace!(collection = %self.collection, batch = n, points = batch.len(), "upserted batch");
        }
        Ok(ids)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let dims = self.dims.load(Ordering::SeqCst);
        if dims > 0 && query.len() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let path = format!("{}/points/search", self.collection_path());
        let json = self.call_ok(Method::POST, &path, Some(&body)).await?;
        let results = json
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or_else(|| RagError::Index("search response missing result".to_string()))?;

        let mut hits = Vec::with_capacity(results.len());
        for item in results {
            let payload: ChunkPayload = item
                .get("payload")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| RagError::Index(format!("unreadable point payload: {}", e)))?
                .ok_or_else(|| RagError::Index("search hit without payload".to_string()))?;
            hits.push(SearchHit {
                point_id: item.get("id").map(point_id).unwrap_or_default(),
                score: item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                rank: 0,
                payload,
            });
        }

        Ok(finalize_hits(hits, top_k, score_threshold))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, RagError> {
        let filter = Self::document_filter(document_id);
        let removed = self.count_matching(Some(filter.clone())).await?;
        if removed == 0 {
            return Ok(0);
        }

        let path = format!("{}/points/delete?wait=true", self.collection_path());
        self.call_ok(Method::POST, &path, Some(&json!({ "filter": filter })))
            .await?;
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<(), RagError> {
        self.drop_collection().await?;
        let dims = self.dims.load(Ordering::SeqCst);
        if dims > 0 {
            self.create_collection(dims).await?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.count_matching(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_accepts_string_and_number() {
        assert_eq!(point_id(&json!("abc")), "abc");
        assert_eq!(point_id(&json!(42)), "42");
    }

    #[test]
    fn test_document_filter_shape() {
        let filter = QdrantIndex::document_filter("doc-1");
        assert_eq!(filter["must"][0]["key"], "document_id");
        assert_eq!(filter["must"][0]["match"]["value"], "doc-1");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_index_unavailable() {
        let config = IndexConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..IndexConfig::default()
        };
        let index = QdrantIndex::new(&config).unwrap();
        let err = index.ping().await.unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
    }
}
