//! Per-agent token tallies and append-only source attributions.
//!
//! Both trackers are accessed concurrently by fan-out workers within an agent (§5: "the citation
//! / token trackers are accessed concurrently and must be safe against concurrent insertion").
//! They use `tokio::sync::Mutex` around a plain map/vec, the same primitive the LLM client
//! wrappers elsewhere in this crate use to guard a usage slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A single attribution record tying a data point back to its source.
///
/// Identity for dedup purposes (used only by `StateManager::merge_parallel_contexts`, never by
/// `CitationTracker` itself, which is purely append-only) is `(source, data_point, symbol, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub url: Option<String>,
    pub date: DateTime<Utc>,
    pub agent: Option<String>,
    pub data_point: Option<String>,
    pub symbol: Option<String>,
}

impl Citation {
    fn identity_key(&self) -> (String, String, String, String) {
        (
            self.source.clone(),
            self.data_point.clone().unwrap_or_default(),
            self.symbol.clone().unwrap_or_default(),
            self.date.to_rfc3339(),
        )
    }
}

/// Append-only buffer of [`Citation`]s accumulated during a single agent's execution.
///
/// Workers push into a shared tracker as their fan-out tasks complete; the agent drains it into
/// `SharedContext::citations` at fan-in. Never deduplicates on its own - identity-based dedup
/// only happens, per spec §3, on merge.
#[derive(Default)]
pub struct CitationTracker {
    citations: Mutex<Vec<Citation>>,
}

impl CitationTracker {
    pub fn new() -> Self {
        CitationTracker {
            citations: Mutex::new(Vec::new()),
        }
    }

    pub async fn add(&self, citation: Citation) {
        self.citations.lock().await.push(citation);
    }

    /// Drain every citation recorded so far, leaving the tracker empty.
    pub async fn drain(&self) -> Vec<Citation> {
        std::mem::take(&mut *self.citations.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.citations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Deduplicate citations by identity key, keeping the first occurrence of each.
///
/// Used by `StateManager::merge_parallel_contexts` when concatenating citation lists from
/// multiple fan-out branches - lists are concatenated in completion order, then this removes
/// exact-identity duplicates the way the invariant in §3 requires.
pub fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.identity_key()))
        .collect()
}

/// Per-agent additive token tally.
///
/// `track(agent, tokens)` is additive (§4.1: `trackTokenUsage` is additive), matching the
/// semantics of `SharedContext::token_usage`. Backed by a `Mutex<HashMap<..>>` rather than a
/// lock-free map since the pack carries no concurrent-map crate and the contention window here
/// is a single increment per fan-out task.
#[derive(Default)]
pub struct TokenTracker {
    usage: Mutex<HashMap<String, u64>>,
}

impl TokenTracker {
    pub fn new() -> Self {
        TokenTracker {
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub async fn track(&self, agent: &str, tokens: u64) {
        let mut usage = self.usage.lock().await;
        *usage.entry(agent.to_string()).or_insert(0) += tokens;
    }

    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.usage.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_tracker_accumulates_additively() {
        let tracker = TokenTracker::new();
        tracker.track("Research Agent", 100).await;
        tracker.track("Research Agent", 50).await;
        tracker.track("Analyst Agent", 10).await;
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.get("Research Agent"), Some(&150));
        assert_eq!(snapshot.get("Analyst Agent"), Some(&10));
    }

    #[tokio::test]
    async fn citation_tracker_drain_empties_buffer() {
        let tracker = CitationTracker::new();
        tracker
            .add(Citation {
                source: "yahoo_finance".into(),
                url: None,
                date: Utc::now(),
                agent: Some("Research Agent".into()),
                data_point: Some("stock_price".into()),
                symbol: Some("AAPL".into()),
            })
            .await;
        assert_eq!(tracker.len().await, 1);
        let drained = tracker.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(tracker.is_empty().await);
    }

    #[test]
    fn dedup_citations_keeps_first_occurrence_by_identity() {
        let date = Utc::now();
        let a = Citation {
            source: "yahoo_finance".into(),
            url: Some("https://a".into()),
            date,
            agent: Some("Research Agent".into()),
            data_point: Some("stock_price".into()),
            symbol: Some("AAPL".into()),
        };
        let mut b = a.clone();
        b.url = Some("https://b".into());
        let deduped = dedup_citations(vec![a.clone(), b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].url, a.url);
    }
}
