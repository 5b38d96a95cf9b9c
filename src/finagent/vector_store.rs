//! Vector-store adapter contract (§6) plus an in-process implementation.
//!
//! The backing store itself is an external collaborator the rest of the system is specified
//! against only at the interface level - no vector-database client crate appears anywhere in
//! this codebase's dependency corpus, so rather than fabricate one, [`InMemoryVectorStore`]
//! satisfies the contract directly: per-collection document storage with brute-force
//! cosine-ranked search, the same scoring function [`crate::cache`] already uses for query
//! history. A real deployment swaps this for a client hitting an actual vector database behind
//! the same [`VectorStore`] trait.

use crate::cache::cosine_similarity;
use crate::error::VectorStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// One stored item: its text, scalar metadata, and embedding.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, Value>,
    pub embedding: Vec<f32>,
}

/// A single hit from [`VectorStore::query`]/[`VectorStore::search_similar`].
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, Value>,
    pub distance: f32,
}

/// Drop `null` metadata values and stringify anything non-scalar, per §6's `addDocument`
/// contract.
fn normalize_metadata(metadata: HashMap<String, Value>) -> HashMap<String, Value> {
    metadata
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Some((key, value)),
            other => Some((key, Value::String(other.to_string()))),
        })
        .collect()
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add_document(
        &self,
        collection: &str,
        text: &str,
        metadata: HashMap<String, Value>,
        id: Option<String>,
        embedding: Vec<f32>,
    ) -> Result<String, VectorStoreError>;

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<QueryHit>, VectorStoreError>;

    async fn search_similar(
        &self,
        collection: &str,
        embedding: &[f32],
        n: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        self.query(collection, embedding, n, filter).await
    }
}

struct Collection {
    dimension: Option<usize>,
    documents: Vec<StoredDocument>,
}

struct CachedQuery {
    hits: Vec<QueryHit>,
    inserted_at: DateTime<Utc>,
}

fn matches_filter(metadata: &HashMap<String, Value>, filter: &HashMap<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

fn query_cache_key(collection: &str, embedding: &[f32], n: usize, filter: Option<&HashMap<String, Value>>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    for value in embedding {
        hasher.update(value.to_le_bytes());
    }
    hasher.update(n.to_le_bytes());
    if let Some(filter) = filter {
        let mut entries: Vec<(&String, &Value)> = filter.iter().collect();
        entries.sort_by_key(|(k, _)| k.as_str());
        for (key, value) in entries {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// In-process adapter: one `RwLock`-guarded map of collections plus a TTL'd query-result cache,
/// keyed exactly as §5 specifies: a hash over `(collection, queryEmbedding, n, where)`.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
    query_cache: RwLock<HashMap<String, CachedQuery>>,
    query_cache_ttl: Duration,
}

impl InMemoryVectorStore {
    pub fn new(query_cache_ttl_secs: u64) -> Self {
        InMemoryVectorStore {
            collections: RwLock::new(HashMap::new()),
            query_cache: RwLock::new(HashMap::new()),
            query_cache_ttl: Duration::from_secs(query_cache_ttl_secs),
        }
    }

    pub async fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_document(
        &self,
        collection: &str,
        text: &str,
        metadata: HashMap<String, Value>,
        id: Option<String>,
        embedding: Vec<f32>,
    ) -> Result<String, VectorStoreError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let metadata = normalize_metadata(metadata);
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_insert_with(|| Collection {
            dimension: None,
            documents: Vec::new(),
        });

        match entry.dimension {
            None => entry.dimension = Some(embedding.len()),
            Some(expected) if expected != embedding.len() => {
                // Dimension-mismatch recovery (§6): recreate the collection at the new width,
                // whether or not it already held documents, rather than surfacing the mismatch.
                entry.documents.clear();
                entry.dimension = Some(embedding.len());
            }
            _ => {}
        }

        entry.documents.push(StoredDocument {
            id: id.clone(),
            text: text.to_string(),
            metadata,
            embedding,
        });
        Ok(id)
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        let cache_key = query_cache_key(collection, embedding, n, filter);
        {
            let cache = self.query_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                let age = Utc::now().signed_duration_since(cached.inserted_at);
                if age.num_seconds() as u64 <= self.query_cache_ttl.as_secs() {
                    return Ok(cached.hits.clone());
                }
            }
        }

        let collections = self.collections.read().await;
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &StoredDocument)> = entry
            .documents
            .iter()
            .filter(|doc| filter.map(|f| matches_filter(&doc.metadata, f)).unwrap_or(true))
            .map(|doc| (cosine_similarity(embedding, &doc.embedding), doc))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);

        let hits: Vec<QueryHit> = scored
            .into_iter()
            .map(|(similarity, doc)| QueryHit {
                id: doc.id.clone(),
                document: doc.text.clone(),
                metadata: doc.metadata.clone(),
                distance: 1.0 - similarity,
            })
            .collect();

        drop(collections);
        self.query_cache.write().await.insert(
            cache_key,
            CachedQuery { hits: hits.clone(), inserted_at: Utc::now() },
        );
        Ok(hits)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(3_600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect()
    }

    #[tokio::test]
    async fn add_document_then_query_returns_closest_match_first() {
        let store = InMemoryVectorStore::new(3_600);
        store.add_document("financial_news", "AAPL surges", meta(&[("symbol", "AAPL")]), None, vec![1.0, 0.0]).await.unwrap();
        store.add_document("financial_news", "MSFT steady", meta(&[("symbol", "MSFT")]), None, vec![0.0, 1.0]).await.unwrap();

        let hits = store.query("financial_news", &[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].document, "AAPL surges");
    }

    #[tokio::test]
    async fn query_respects_metadata_filter() {
        let store = InMemoryVectorStore::new(3_600);
        store.add_document("financial_news", "AAPL surges", meta(&[("symbol", "AAPL")]), None, vec![1.0, 0.0]).await.unwrap();
        store.add_document("financial_news", "MSFT steady", meta(&[("symbol", "MSFT")]), None, vec![1.0, 0.0]).await.unwrap();

        let filter = meta(&[("symbol", "MSFT")]);
        let hits = store.query("financial_news", &[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "MSFT steady");
    }

    #[tokio::test]
    async fn dimension_mismatch_on_non_empty_collection_recreates_silently() {
        let store = InMemoryVectorStore::new(3_600);
        store.add_document("company_analysis", "doc1", HashMap::new(), None, vec![1.0, 0.0]).await.unwrap();
        let result = store.add_document("company_analysis", "doc2", HashMap::new(), None, vec![1.0, 0.0, 0.0]).await;
        assert!(result.is_ok());
        assert_eq!(store.collection_len("company_analysis").await, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_on_empty_collection_recreates_silently() {
        let store = InMemoryVectorStore::new(3_600);
        let result = store.add_document("fresh_collection", "doc1", HashMap::new(), None, vec![1.0, 0.0, 0.0]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn null_metadata_values_are_dropped_and_non_scalars_stringified() {
        let store = InMemoryVectorStore::new(3_600);
        let mut metadata = HashMap::new();
        metadata.insert("symbol".to_string(), Value::String("AAPL".to_string()));
        metadata.insert("dropped".to_string(), Value::Null);
        metadata.insert("nested".to_string(), serde_json::json!({"a": 1}));
        store.add_document("financial_news", "doc", metadata, Some("id1".to_string()), vec![1.0]).await.unwrap();

        let hits = store.query("financial_news", &[1.0], 1, None).await.unwrap();
        assert!(!hits[0].metadata.contains_key("dropped"));
        assert!(matches!(hits[0].metadata.get("nested"), Some(Value::String(_))));
    }

    #[tokio::test]
    async fn query_on_unknown_collection_returns_empty_rather_than_erroring() {
        let store = InMemoryVectorStore::new(3_600);
        let hits = store.query("nonexistent", &[1.0, 0.0], 5, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
