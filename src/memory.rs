use crate::database::{check_dimension, validate_batch, ChunkPayload, SearchResult, VectorStore};
use crate::embeddings::Embedding;
use crate::error::Result;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

struct Record {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// In-process vector store ranking records by cosine similarity
pub struct MemoryStore {
    dimension: usize,
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        MemoryStore {
            dimension,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Stored ids in sorted order
    pub async fn ids(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    pub async fn payload(&self, id: &str) -> Option<ChunkPayload> {
        self.records.read().await.get(id).map(|r| r.payload.clone())
    }
}

impl VectorStore for MemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(
        &self,
        ids: Vec<String>,
        vectors: Vec<Embedding>,
        payloads: Vec<ChunkPayload>,
    ) -> Result<usize> {
        validate_batch(&ids, &vectors, &payloads, self.dimension)?;

        let mut records = self.records.write().await;
        let count = ids.len();
        for ((id, vector), payload) in ids.into_iter().zip(vectors).zip(payloads) {
            records.insert(
                id,
                Record {
                    vector: vector.values,
                    payload,
                },
            );
        }
        Ok(count)
    }

    async fn search(&self, query: &Embedding, top_k: u64) -> Result<SearchResult> {
        check_dimension(query, self.dimension)?;

        let records = self.records.read().await;
        let mut scored: Vec<(f32, &String, &Record)> = records
            .iter()
            .map(|(id, record)| (cosine_similarity(&query.values, &record.vector), id, record))
            .collect();

        // best first; ties keep id order
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        Ok(scored
            .into_iter()
            .take(usize::try_from(top_k).unwrap_or(usize::MAX))
            .map(|(_, _, record)| record.payload.clone())
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn payload(text: &str) -> ChunkPayload {
        ChunkPayload {
            source_id: "a.pdf".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_on_empty_store_is_empty() {
        let store = MemoryStore::new(2);
        let result = store.search(&Embedding::new(vec![1.0, 0.0]), 5).await.unwrap();
        assert!(result.contexts.is_empty());
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = MemoryStore::new(2);
        store
            .upsert(
                vec!["x".to_string()],
                vec![Embedding::new(vec![1.0, 0.0])],
                vec![payload("old")],
            )
            .await
            .unwrap();
        store
            .upsert(
                vec!["x".to_string()],
                vec![Embedding::new(vec![0.0, 1.0])],
                vec![payload("new")],
            )
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.payload("x").await.unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine_and_limits() {
        let store = MemoryStore::new(2);
        store
            .upsert(
                vec!["a".into(), "b".into(), "c".into()],
                vec![
                    Embedding::new(vec![0.0, 1.0]),
                    Embedding::new(vec![1.0, 0.1]),
                    Embedding::new(vec![1.0, 1.0]),
                ],
                vec![payload("far"), payload("closest"), payload("middle")],
            )
            .await
            .unwrap();

        let result = store.search(&Embedding::new(vec![1.0, 0.0]), 2).await.unwrap();
        assert_eq!(result.contexts, vec!["closest", "middle"]);
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let store = MemoryStore::new(3);
        let err = store
            .upsert(
                vec!["a".into()],
                vec![Embedding::new(vec![1.0])],
                vec![payload("t")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
