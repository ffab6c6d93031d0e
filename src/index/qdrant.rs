//! Qdrant [`VectorIndex`] backend over the REST API.
//!
//! Talks to a Qdrant instance using plain HTTP endpoints:
//!
//! - `GET /collections/{name}` — existence check and stats
//! - `PUT /collections/{name}` — create collection
//! - `PUT /collections/{name}/points?wait=true` — upsert points
//! - `POST /collections/{name}/points/search` — similarity search
//! - `POST /collections/{name}/points/delete?wait=true` — delete by id
//! - `DELETE /collections/{name}` — drop collection
//!
//! Point payloads carry the ciphertext token under `encrypted_text` plus
//! non-sensitive metadata. Qdrant never sees plaintext; a dump of the
//! collection yields vectors and opaque tokens only.
//!
//! Writes use `wait=true` so an upsert that returns `Ok` is durable in
//! the collection, which the ingestion rollback path relies on.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::{RagError, Result};
use crate::models::{CollectionInfo, QueryHit, VectorRecord};

use super::VectorIndex;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Qdrant-backed index.
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| RagError::Storage(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            client,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn request_err(&self, e: reqwest::Error) -> RagError {
        RagError::Storage(format!(
            "Qdrant request failed (is Qdrant running at {}?): {}",
            self.base_url, e
        ))
    }
}

/// Fail on non-2xx statuses, folding the response body into the error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(RagError::Storage(format!(
            "Qdrant API error {}: {}",
            status, body
        )))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dims: usize, distance: &str) -> Result<()> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| self.request_err(e))?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            check(response).await?;
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": {
                "size": dims,
                "distance": distance,
            },
        });
        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_err(e))?;
        check(response).await?;
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        let points: Vec<serde_json::Value> = records
            .into_iter()
            .map(|record| {
                let mut payload = serde_json::Map::new();
                payload.insert(
                    "encrypted_text".to_string(),
                    serde_json::Value::String(record.encrypted_text),
                );
                for (key, value) in record.metadata {
                    payload.insert(key, serde_json::Value::String(value));
                }
                serde_json::json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": payload,
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await
            .map_err(|e| self.request_err(e))?;
        check(response).await?;
        Ok(ids)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<QueryHit>> {
        let mut body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = serde_json::json!(threshold);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_err(e))?;

        // Searching a collection that was never created yields no hits.
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let response = check(response).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Storage(format!("Qdrant response: {}", e)))?;
        parse_search_response(&json)
    }

    async fn info(&self) -> Result<CollectionInfo> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| self.request_err(e))?;

        if response.status().as_u16() == 404 {
            return Ok(CollectionInfo {
                name: self.collection.clone(),
                point_count: 0,
                vector_count: 0,
                status: "missing".to_string(),
            });
        }
        let response = check(response).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Storage(format!("Qdrant response: {}", e)))?;
        Ok(parse_collection_info(&json, &self.collection))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&serde_json::json!({ "points": ids }))
            .send()
            .await
            .map_err(|e| self.request_err(e))?;
        check(response).await?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .map_err(|e| self.request_err(e))?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

fn parse_search_response(json: &serde_json::Value) -> Result<Vec<QueryHit>> {
    let results = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| RagError::Storage("invalid Qdrant response: missing result array".into()))?;

    let mut hits = Vec::with_capacity(results.len());
    for item in results {
        let id = match item.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(RagError::Storage(
                    "invalid Qdrant response: point without id".into(),
                ))
            }
        };
        let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;

        let payload = item
            .get("payload")
            .and_then(|p| p.as_object())
            .cloned()
            .unwrap_or_default();
        let encrypted_text = match payload.get("encrypted_text").and_then(|t| t.as_str()) {
            Some(token) => token.to_string(),
            None => {
                // A point without a token was not written by this system.
                tracing::warn!("skipping point {id}: payload has no encrypted_text");
                continue;
            }
        };

        let mut metadata = BTreeMap::new();
        for (key, value) in &payload {
            if key == "encrypted_text" {
                continue;
            }
            let text = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            metadata.insert(key.clone(), text);
        }

        hits.push(QueryHit {
            id,
            score,
            encrypted_text,
            metadata,
        });
    }
    Ok(hits)
}

fn parse_collection_info(json: &serde_json::Value, name: &str) -> CollectionInfo {
    let result = json.get("result").cloned().unwrap_or_default();
    let point_count = result
        .get("points_count")
        .and_then(|c| c.as_u64())
        .unwrap_or(0);
    let vector_count = result
        .get("vectors_count")
        .and_then(|c| c.as_u64())
        .unwrap_or(point_count);
    let status = result
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("unknown")
        .to_string();
    CollectionInfo {
        name: name.to_string(),
        point_count,
        vector_count,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let index = QdrantIndex::new(&IndexConfig {
            url: "http://localhost:6333/".to_string(),
            ..IndexConfig::default()
        })
        .unwrap();
        assert_eq!(index.base_url, "http://localhost:6333");
        assert_eq!(
            index.collection_url(),
            "http://localhost:6333/collections/encrypted_documents"
        );
    }

    #[test]
    fn test_parse_search_response() {
        let json = serde_json::json!({
            "result": [
                {
                    "id": "9f8d2c1e-0000-0000-0000-000000000001",
                    "score": 0.91,
                    "payload": {
                        "encrypted_text": "dG9rZW4=",
                        "source": "notes.txt",
                        "chunk_index": "0"
                    }
                },
                {
                    "id": 7,
                    "score": 0.66,
                    "payload": { "encrypted_text": "b3RoZXI=" }
                },
                {
                    "id": "no-token",
                    "score": 0.5,
                    "payload": { "source": "stray.txt" }
                }
            ]
        });

        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "9f8d2c1e-0000-0000-0000-000000000001");
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert_eq!(hits[0].encrypted_text, "dG9rZW4=");
        assert_eq!(hits[0].metadata.get("source").unwrap(), "notes.txt");
        assert!(!hits[0].metadata.contains_key("encrypted_text"));
        assert_eq!(hits[1].id, "7");
    }

    #[test]
    fn test_parse_search_response_requires_result() {
        let err = parse_search_response(&serde_json::json!({"status": "ok"})).unwrap_err();
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_parse_collection_info() {
        let json = serde_json::json!({
            "result": {
                "status": "green",
                "points_count": 42,
                "vectors_count": null
            }
        });
        let info = parse_collection_info(&json, "encrypted_documents");
        assert_eq!(info.name, "encrypted_documents");
        assert_eq!(info.point_count, 42);
        assert_eq!(info.vector_count, 42);
        assert_eq!(info.status, "green");

        let sparse = parse_collection_info(&serde_json::json!({}), "c");
        assert_eq!(sparse.point_count, 0);
        assert_eq!(sparse.status, "unknown");
    }
}
