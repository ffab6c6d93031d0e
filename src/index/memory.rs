//! In-memory [`VectorIndex`] implementation for testing and offline runs.
//!
//! Holds points in a `Vec` behind `tokio::sync::RwLock`. Search is
//! brute-force cosine similarity over all stored vectors; the configured
//! distance metric is accepted but cosine is always used. State lives
//! only for the lifetime of the process.

use tokio::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{CollectionInfo, QueryHit, VectorRecord};

use super::VectorIndex;

struct MemCollection {
    dims: usize,
    points: Vec<VectorRecord>,
}

/// In-memory index. Per-process; nothing survives exit.
pub struct MemoryIndex {
    name: String,
    collection: RwLock<Option<MemCollection>>,
}

impl MemoryIndex {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: RwLock::new(None),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, dims: usize, _distance: &str) -> Result<()> {
        let mut guard = self.collection.write().await;
        match guard.as_ref() {
            None => {
                *guard = Some(MemCollection {
                    dims,
                    points: Vec::new(),
                });
                Ok(())
            }
            Some(existing) if existing.dims == dims => Ok(()),
            Some(existing) => Err(RagError::Storage(format!(
                "collection '{}' exists with {} dims, requested {}",
                self.name, existing.dims, dims
            ))),
        }
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        let mut guard = self.collection.write().await;
        let collection = guard.as_mut().ok_or_else(|| {
            RagError::Storage(format!("collection '{}' does not exist", self.name))
        })?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            if record.vector.len() != collection.dims {
                return Err(RagError::Storage(format!(
                    "vector has {} dims, collection '{}' expects {}",
                    record.vector.len(),
                    self.name,
                    collection.dims
                )));
            }
            ids.push(record.id.clone());
            match collection.points.iter_mut().find(|p| p.id == record.id) {
                Some(existing) => *existing = record,
                None => collection.points.push(record),
            }
        }
        Ok(ids)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<QueryHit>> {
        let guard = self.collection.read().await;
        let collection = match guard.as_ref() {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<QueryHit> = collection
            .points
            .iter()
            .filter_map(|point| {
                let score = cosine_similarity(vector, &point.vector);
                match score_threshold {
                    Some(threshold) if score < threshold => None,
                    _ => Some(QueryHit {
                        id: point.id.clone(),
                        score,
                        encrypted_text: point.encrypted_text.clone(),
                        metadata: point.metadata.clone(),
                    }),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn info(&self) -> Result<CollectionInfo> {
        let guard = self.collection.read().await;
        Ok(match guard.as_ref() {
            Some(collection) => CollectionInfo {
                name: self.name.clone(),
                point_count: collection.points.len() as u64,
                vector_count: collection.points.len() as u64,
                status: "green".to_string(),
            },
            None => CollectionInfo {
                name: self.name.clone(),
                point_count: 0,
                vector_count: 0,
                status: "missing".to_string(),
            },
        })
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.collection.write().await;
        if let Some(collection) = guard.as_mut() {
            collection.points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut guard = self.collection.write().await;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            encrypted_text: format!("token-{}", id),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let index = MemoryIndex::new("test");
        index.ensure_collection(2, "Cosine").await.unwrap();
        index
            .upsert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.0, 1.0]),
                record("c", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert_eq!(hits[2].id, "b");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].encrypted_text, "token-a");
    }

    #[tokio::test]
    async fn test_search_applies_threshold_and_top_k() {
        let index = MemoryIndex::new("test");
        index.ensure_collection(2, "Cosine").await.unwrap();
        index
            .upsert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.9, 0.1]),
                record("c", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 2);

        let hits = index.search(&[1.0, 0.0], 1, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_empty() {
        let index = MemoryIndex::new("test");
        let hits = index.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let index = MemoryIndex::new("test");
        index.ensure_collection(2, "Cosine").await.unwrap();
        index
            .upsert(vec![record("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert(vec![VectorRecord {
                encrypted_text: "token-new".to_string(),
                ..record("a", vec![0.0, 1.0])
            }])
            .await
            .unwrap();

        let info = index.info().await.unwrap();
        assert_eq!(info.point_count, 1);
        let hits = index.search(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].encrypted_text, "token-new");
    }

    #[tokio::test]
    async fn test_upsert_requires_collection_and_checks_dims() {
        let index = MemoryIndex::new("test");
        let err = index
            .upsert(vec![record("a", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "storage");

        index.ensure_collection(3, "Cosine").await.unwrap();
        let err = index
            .upsert(vec![record("a", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "storage");
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let index = MemoryIndex::new("test");
        index.ensure_collection(4, "Cosine").await.unwrap();
        index.ensure_collection(4, "Cosine").await.unwrap();
        assert!(index.ensure_collection(8, "Cosine").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_drop() {
        let index = MemoryIndex::new("test");
        index.ensure_collection(2, "Cosine").await.unwrap();
        index
            .upsert(vec![
                record("a", vec![1.0, 0.0]),
                record("b", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        index.delete(&["a".to_string(), "zz".to_string()]).await.unwrap();
        assert_eq!(index.info().await.unwrap().point_count, 1);

        index.drop_collection().await.unwrap();
        let info = index.info().await.unwrap();
        assert_eq!(info.status, "missing");
        assert_eq!(info.point_count, 0);

        // Deleting from a dropped collection is a no-op.
        index.delete(&["b".to_string()]).await.unwrap();
    }
}
