//! The vector index is an external collaborator, abstracted as a typed
//! KNN store (spec.md §1, §6, §9 "Retrieval store substitutability"): the
//! core depends only on filtered top-k search with stable, higher-is-more
//! -similar score ordering and no cross-filter leakage — never on a
//! particular index structure (exact vs. approximate, dense vs. hybrid).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// One stored vector plus its opaque metadata, as handed to `insert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One hit from `search`: higher `score` is more similar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub total_vectors: usize,
    pub dimension: Option<usize>,
}

/// A metadata filter is an exact-match conjunction over string-valued
/// fields — sufficient for the `(database_id, data_type)` filters the
/// retrieval store issues (spec.md §4.5 "Invariants").
pub type MetadataFilter = HashMap<String, String>;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, record: VectorRecord) -> CoreResult<()>;

    async fn insert_batch(&self, records: Vec<VectorRecord>) -> CoreResult<()> {
        for record in records {
            self.insert(record).await?;
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], filter: &MetadataFilter, limit: usize) -> CoreResult<Vec<SearchHit>>;

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> CoreResult<usize>;

    async fn get_stats(&self) -> CoreResult<VectorStoreStats>;
}

/// Brute-force cosine-similarity store, the in-process default this crate
/// ships (spec.md never assumes a particular index; an exact linear scan
/// is a valid implementation for modest corpus sizes): a flat `Vec` of
/// `(id, vector)` scored linearly, HNSW left as a documented future
/// upgrade rather than fabricated here.
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self { records: RwLock::new(Vec::new()) }
    }

    fn matches(metadata: &HashMap<String, serde_json::Value>, filter: &MetadataFilter) -> bool {
        filter.iter().all(|(key, value)| {
            metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s == value)
                .unwrap_or(false)
        })
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, record: VectorRecord) -> CoreResult<()> {
        let mut records = self.records.write().map_err(|_| CoreError::StorageError("vector store lock poisoned".into()))?;
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], filter: &MetadataFilter, limit: usize) -> CoreResult<Vec<SearchHit>> {
        let records = self.records.read().map_err(|_| CoreError::StorageError("vector store lock poisoned".into()))?;
        let mut scored: Vec<SearchHit> = records
            .iter()
            .filter(|r| Self::matches(&r.metadata, filter))
            .map(|r| SearchHit {
                id: r.id,
                score: cosine_similarity(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> CoreResult<usize> {
        let mut records = self.records.write().map_err(|_| CoreError::StorageError("vector store lock poisoned".into()))?;
        let before = records.len();
        records.retain(|r| !Self::matches(&r.metadata, filter));
        Ok(before - records.len())
    }

    async fn get_stats(&self) -> CoreResult<VectorStoreStats> {
        let records = self.records.read().map_err(|_| CoreError::StorageError("vector store lock poisoned".into()))?;
        Ok(VectorStoreStats {
            total_vectors: records.len(),
            dimension: records.first().map(|r| r.vector.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Uuid, vector: Vec<f32>, database_id: &str, data_type: &str) -> VectorRecord {
        let mut metadata = HashMap::new();
        metadata.insert("database_id".to_string(), serde_json::Value::String(database_id.to_string()));
        metadata.insert("data_type".to_string(), serde_json::Value::String(data_type.to_string()));
        VectorRecord { id, vector, metadata }
    }

    #[tokio::test]
    async fn search_never_crosses_database_filter() {
        let store = InMemoryVectorStore::new();
        store.insert(record(Uuid::new_v4(), vec![1.0, 0.0], "shop", "QA_PAIR")).await.unwrap();
        store.insert(record(Uuid::new_v4(), vec![1.0, 0.0], "other_db", "QA_PAIR")).await.unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("database_id".to_string(), "shop".to_string());
        filter.insert("data_type".to_string(), "QA_PAIR".to_string());

        let hits = store.search(&[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn higher_similarity_ranks_first() {
        let store = InMemoryVectorStore::new();
        let mut filter = MetadataFilter::new();
        filter.insert("database_id".to_string(), "shop".to_string());

        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        store.insert(record(close, vec![1.0, 0.1], "shop", "QA_PAIR")).await.unwrap();
        store.insert(record(far, vec![0.1, 1.0], "shop", "QA_PAIR")).await.unwrap();

        let hits = store.search(&[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(hits[0].id, close);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn delete_by_filter_removes_matching_records_only() {
        let store = InMemoryVectorStore::new();
        store.insert(record(Uuid::new_v4(), vec![1.0], "shop", "QA_PAIR")).await.unwrap();
        store.insert(record(Uuid::new_v4(), vec![1.0], "other_db", "QA_PAIR")).await.unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("database_id".to_string(), "shop".to_string());
        let deleted = store.delete_by_filter(&filter).await.unwrap();
        assert_eq!(deleted, 1);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_vectors, 1);
    }
}
