//! The shared context that threads through the fixed agent pipeline, and the StateManager that
//! is its sole mutator.
//!
//! `SharedContext` is the single evolving record described in spec §3: created once by
//! [`StateManager::create_initial`] at query entry, read by each pipeline node, and mutated only
//! through the free functions on [`StateManager`] (agents never reach into its fields by hand
//! for anything but reads). Fan-out workers clone a `SharedContext`, work on their own copy, and
//! hand their delta back for [`StateManager::merge_parallel_contexts`] to fold in at fan-in -
//! this is option (b) from spec §9's ownership re-architecture note: an immutable value with
//! copy-on-write maps and an explicit merge, rather than a single mutable handle passed by
//! reference.

use crate::guardrails;
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::tracking::{dedup_citations, Citation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `SharedContext::query_type`, derived from the keyword table in spec §9 when not supplied
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SingleStock,
    Comparison,
    Trend,
    Sentiment,
    Similarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Complete,
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    Benchmark,
    SideBySide,
}

/// Per-symbol provenance recorded alongside `research_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchMetadata {
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub data_quality: DataQuality,
}

/// `recommendation` field of an `AnalysisResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendationAction,
    pub confidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
    Buy,
    Sell,
    Hold,
}

/// Per-symbol Analyst agent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub financial: serde_json::Value,
    pub sentiment: Option<serde_json::Value>,
    pub trend: Option<serde_json::Value>,
    pub historical_context: Vec<serde_json::Value>,
    pub recommendation: Recommendation,
}

/// `comparisonData` produced by the Comparison agent; shape depends on `comparison_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonData {
    pub comparison_type: ComparisonType,
    pub symbol: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub metrics: serde_json::Value,
    pub insights: String,
    pub historical_patterns: Option<serde_json::Value>,
    pub comparison_table: Option<ComparisonTable>,
}

/// Row-oriented comparison table for side-by-side output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
}

/// A single entry in `execution_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOrderEntry {
    pub agent: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

/// The versioned, size-bounded, mergeable context described in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContext {
    pub transaction_id: String,
    pub session_id: Option<String>,
    pub context_version: u64,
    pub context_size_bytes: usize,

    pub query_text: String,
    pub query_type: QueryType,
    pub symbols: Vec<String>,
    pub query_embedding: Option<Vec<f32>>,

    pub research_data: HashMap<String, serde_json::Value>,
    pub research_metadata: HashMap<String, ResearchMetadata>,

    pub analysis_results: HashMap<String, AnalysisResult>,
    pub analysis_reasoning: HashMap<String, String>,
    pub sentiment_analysis: HashMap<String, serde_json::Value>,
    pub trend_analysis: HashMap<String, serde_json::Value>,

    pub comparison_data: Option<ComparisonData>,

    pub final_report: Option<String>,
    pub visualizations: Option<serde_json::Value>,

    pub citations: Vec<Citation>,
    pub vector_db_references: Vec<String>,

    pub token_usage: HashMap<String, u64>,
    pub execution_time: HashMap<String, f64>,
    pub agents_executed: Vec<String>,

    pub progress_events: Vec<ProgressEvent>,
    pub current_agent: Option<String>,
    pub current_tasks: HashMap<String, Vec<String>>,
    pub execution_order: Vec<ExecutionOrderEntry>,

    pub previous_query_id: Option<String>,
    pub previous_symbols: Vec<String>,
    pub new_symbols: Vec<String>,
    pub is_incremental: bool,
    pub similar_queries: Vec<String>,
    pub related_context_ids: Vec<String>,

    pub partial_success: bool,
    pub symbol_status: HashMap<String, SymbolStatus>,
    pub symbol_errors: HashMap<String, String>,
}

/// Sole mutator of [`SharedContext`]. Every method here takes the context(s) it needs and
/// returns the updated value(s) - there is no hidden aliasing across concurrently running
/// fan-out tasks, since each one owns its own clone until merge time.
pub struct StateManager;

impl StateManager {
    /// Fill every collection with its empty value, derive `query_type` by keyword scan when
    /// omitted, and derive `symbols` via [`guardrails::extract_symbols`] when omitted.
    /// `transaction_id` identifies this one run; `session_id`, when present, identifies the
    /// cross-run conversation this query continues (§3) and is distinct from it.
    pub fn create_initial(
        query: &str,
        query_type: Option<QueryType>,
        symbols: Option<Vec<String>>,
        transaction_id: Option<String>,
        session_id: Option<String>,
    ) -> SharedContext {
        let transaction_id = transaction_id.unwrap_or_else(|| {
            uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
        });
        let query_type = query_type.unwrap_or_else(|| guardrails::detect_query_type(query));
        let symbols = symbols.unwrap_or_else(|| guardrails::extract_symbols(query));

        SharedContext {
            transaction_id,
            session_id,
            context_version: 0,
            context_size_bytes: 0,
            query_text: query.to_string(),
            query_type,
            symbols,
            query_embedding: None,
            research_data: HashMap::new(),
            research_metadata: HashMap::new(),
            analysis_results: HashMap::new(),
            analysis_reasoning: HashMap::new(),
            sentiment_analysis: HashMap::new(),
            trend_analysis: HashMap::new(),
            comparison_data: None,
            final_report: None,
            visualizations: None,
            citations: Vec::new(),
            vector_db_references: Vec::new(),
            token_usage: HashMap::new(),
            execution_time: HashMap::new(),
            agents_executed: Vec::new(),
            progress_events: Vec::new(),
            current_agent: None,
            current_tasks: HashMap::new(),
            execution_order: Vec::new(),
            previous_query_id: None,
            previous_symbols: Vec::new(),
            new_symbols: Vec::new(),
            is_incremental: false,
            similar_queries: Vec::new(),
            related_context_ids: Vec::new(),
            partial_success: false,
            symbol_status: HashMap::new(),
            symbol_errors: HashMap::new(),
        }
    }

    pub fn update_research_data(
        ctx: &mut SharedContext,
        symbol: &str,
        payload: serde_json::Value,
        metadata: ResearchMetadata,
    ) {
        ctx.research_data.insert(symbol.to_string(), payload);
        ctx.research_metadata.insert(symbol.to_string(), metadata);
        ctx.context_version += 1;
    }

    pub fn update_analysis_results(
        ctx: &mut SharedContext,
        symbol: &str,
        result: AnalysisResult,
        reasoning: String,
    ) {
        ctx.analysis_results.insert(symbol.to_string(), result);
        ctx.analysis_reasoning.insert(symbol.to_string(), reasoning);
        ctx.context_version += 1;
    }

    pub fn add_citation(ctx: &mut SharedContext, citation: Citation) {
        ctx.citations.push(citation);
        ctx.context_version += 1;
    }

    /// Additive: accumulates onto whatever is already recorded for `agent`.
    pub fn track_token_usage(ctx: &mut SharedContext, agent: &str, tokens: u64) {
        *ctx.token_usage.entry(agent.to_string()).or_insert(0) += tokens;
        ctx.context_version += 1;
    }

    /// Overwrite: the latest call for an agent replaces any prior value.
    pub fn track_execution_time(ctx: &mut SharedContext, agent: &str, seconds: f64) {
        ctx.execution_time.insert(agent.to_string(), seconds);
        ctx.context_version += 1;
    }

    /// Idempotent append - calling this twice for the same agent has no further effect.
    pub fn mark_agent_executed(ctx: &mut SharedContext, agent: &str) {
        if !ctx.agents_executed.iter().any(|a| a == agent) {
            ctx.agents_executed.push(agent.to_string());
            ctx.context_version += 1;
        }
    }

    pub fn add_progress_event(ctx: &mut SharedContext, event: ProgressEvent) {
        ctx.progress_events.push(event);
        ctx.current_agent = ProgressTracker::current_agent(&ctx.progress_events);
        ctx.current_tasks = ProgressTracker::current_tasks(&ctx.progress_events);
    }

    pub fn add_execution_order_entry(
        ctx: &mut SharedContext,
        agent: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) {
        let duration_secs = end.map(|e| (e - start).num_milliseconds() as f64 / 1000.0);
        ctx.execution_order.push(ExecutionOrderEntry {
            agent: agent.to_string(),
            start,
            end,
            duration_secs,
        });
        ctx.context_version += 1;
    }

    /// Serialized byte size using a stable (serde_json) encoding. On serialization failure,
    /// `context_size_bytes` is set to 0 and a warning is logged rather than propagating the
    /// error - size accounting never fails the workflow.
    pub fn calculate_context_size(ctx: &mut SharedContext) -> usize {
        let size = match serde_json::to_vec(ctx) {
            Ok(bytes) => bytes.len(),
            Err(err) => {
                log::warn!("failed to serialize context for size accounting: {}", err);
                0
            }
        };
        ctx.context_size_bytes = size;
        size
    }

    /// Three-stage pruner invoked when `context_size_bytes > max_bytes`. Never removes
    /// `final_report`, `research_data`, `analysis_results`, or `citations`. Calling this twice
    /// with no intervening writes is a no-op (prune idempotence, spec §8 property 4) because
    /// each stage only acts on data that is still over its own threshold.
    pub fn prune_context(ctx: &mut SharedContext, max_bytes: usize) {
        Self::calculate_context_size(ctx);
        if ctx.context_size_bytes <= max_bytes {
            return;
        }

        // Stage 1: age-based - drop research_metadata entries older than 24h.
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        ctx.research_metadata.retain(|_, meta| meta.timestamp >= cutoff);
        Self::calculate_context_size(ctx);
        if ctx.context_size_bytes <= max_bytes {
            return;
        }

        // Stage 2: relevance-based - truncate long analysis_reasoning entries.
        for reasoning in ctx.analysis_reasoning.values_mut() {
            if reasoning.chars().count() > 1000 {
                let truncated: String = reasoning.chars().take(500).collect();
                *reasoning = format!("{}…", truncated);
            }
        }
        Self::calculate_context_size(ctx);
        if ctx.context_size_bytes <= max_bytes {
            return;
        }

        // Stage 3: size-based - keep only the tail 50 progress events.
        if ctx.progress_events.len() > 50 {
            let drop = ctx.progress_events.len() - 50;
            ctx.progress_events.drain(0..drop);
            ctx.current_agent = ProgressTracker::current_agent(&ctx.progress_events);
            ctx.current_tasks = ProgressTracker::current_tasks(&ctx.progress_events);
        }
        Self::calculate_context_size(ctx);
    }

    /// Order-independent merge used after a fan-out. `transaction_id` is taken from the first
    /// context; map-valued fields merge by key with right-to-left overwrite (later contexts in
    /// `contexts` win ties); list-valued fields concatenate in the order `contexts` is given
    /// (callers should pass contexts in completion order); `agents_executed` unions preserving
    /// first-seen order.
    pub fn merge_parallel_contexts(mut contexts: Vec<SharedContext>) -> SharedContext {
        assert!(!contexts.is_empty(), "merge_parallel_contexts requires at least one context");
        let mut merged = contexts.remove(0);

        for ctx in contexts {
            merged.research_data.extend(ctx.research_data);
            merged.research_metadata.extend(ctx.research_metadata);
            merged.analysis_results.extend(ctx.analysis_results);
            merged.analysis_reasoning.extend(ctx.analysis_reasoning);
            merged.sentiment_analysis.extend(ctx.sentiment_analysis);
            merged.trend_analysis.extend(ctx.trend_analysis);
            merged.token_usage.extend(ctx.token_usage);
            merged.execution_time.extend(ctx.execution_time);
            merged.symbol_status.extend(ctx.symbol_status);
            merged.symbol_errors.extend(ctx.symbol_errors);

            merged.citations.extend(ctx.citations);
            merged.progress_events.extend(ctx.progress_events);
            merged.execution_order.extend(ctx.execution_order);
            merged.vector_db_references.extend(ctx.vector_db_references);

            for agent in ctx.agents_executed {
                if !merged.agents_executed.contains(&agent) {
                    merged.agents_executed.push(agent);
                }
            }

            if merged.comparison_data.is_none() {
                merged.comparison_data = ctx.comparison_data;
            }
            if merged.final_report.is_none() {
                merged.final_report = ctx.final_report;
            }
            if merged.visualizations.is_none() {
                merged.visualizations = ctx.visualizations;
            }
        }

        merged.citations = dedup_citations(merged.citations);
        merged.partial_success = merged.symbol_status.values().any(|s| matches!(s, SymbolStatus::Failed));
        merged.context_version += 1;
        merged.current_agent = ProgressTracker::current_agent(&merged.progress_events);
        merged.current_tasks = ProgressTracker::current_tasks(&merged.progress_events);
        Self::calculate_context_size(&mut merged);
        merged
    }

    /// For incremental queries: unions `symbols`, merges outputs, additively accumulates
    /// `token_usage`, and preserves `prev.final_report` only if `new.final_report` is empty.
    ///
    /// Per the open-question resolution in DESIGN.md, symbol union here preserves first-seen
    /// insertion order (prev's symbols first, then any new ones) rather than the source
    /// system's `list(set(...))`, which silently drops ordering.
    pub fn merge_incremental_state(prev: &SharedContext, mut new: SharedContext) -> SharedContext {
        let mut symbols = prev.symbols.clone();
        for symbol in &new.symbols {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        new.symbols = symbols;

        for (symbol, payload) in &prev.research_data {
            new.research_data.entry(symbol.clone()).or_insert_with(|| payload.clone());
        }
        for (symbol, result) in &prev.analysis_results {
            new.analysis_results.entry(symbol.clone()).or_insert_with(|| result.clone());
        }
        for (agent, tokens) in &prev.token_usage {
            *new.token_usage.entry(agent.clone()).or_insert(0) += tokens;
        }
        if new.final_report.as_deref().unwrap_or("").is_empty() {
            new.final_report = prev.final_report.clone();
        }

        new.previous_symbols = prev.symbols.clone();
        new.is_incremental = true;
        new.context_version = prev.context_version.max(new.context_version) + 1;
        Self::calculate_context_size(&mut new);
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ResearchMetadata {
        ResearchMetadata {
            sources: vec!["yahoo_finance".into()],
            timestamp: Utc::now(),
            data_quality: DataQuality::Complete,
        }
    }

    #[test]
    fn create_initial_derives_query_type_and_symbols_when_omitted() {
        let ctx = StateManager::create_initial("Compare AAPL and MSFT", None, None, None, None);
        assert_eq!(ctx.query_type, QueryType::Comparison);
        assert_eq!(ctx.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(ctx.transaction_id.len(), 8);
        assert_eq!(ctx.session_id, None);
    }

    #[test]
    fn create_initial_keeps_session_id_and_transaction_id_distinct() {
        let ctx = StateManager::create_initial(
            "Analyze AAPL",
            None,
            None,
            Some("abcd1234".into()),
            Some("session-42".into()),
        );
        assert_eq!(ctx.transaction_id, "abcd1234");
        assert_eq!(ctx.session_id.as_deref(), Some("session-42"));
    }

    #[test]
    fn mark_agent_executed_is_idempotent_and_ordered() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        StateManager::mark_agent_executed(&mut ctx, "Research Agent");
        StateManager::mark_agent_executed(&mut ctx, "Analyst Agent");
        StateManager::mark_agent_executed(&mut ctx, "Research Agent");
        assert_eq!(ctx.agents_executed, vec!["Research Agent", "Analyst Agent"]);
    }

    #[test]
    fn track_token_usage_is_additive_execution_time_overwrites() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        StateManager::track_token_usage(&mut ctx, "Research Agent", 100);
        StateManager::track_token_usage(&mut ctx, "Research Agent", 50);
        StateManager::track_execution_time(&mut ctx, "Research Agent", 1.0);
        StateManager::track_execution_time(&mut ctx, "Research Agent", 2.5);
        assert_eq!(ctx.token_usage["Research Agent"], 150);
        assert_eq!(ctx.execution_time["Research Agent"], 2.5);
    }

    #[test]
    fn context_version_is_strictly_increasing_across_writes() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        let v0 = ctx.context_version;
        StateManager::update_research_data(&mut ctx, "AAPL", serde_json::json!({}), sample_metadata());
        let v1 = ctx.context_version;
        StateManager::mark_agent_executed(&mut ctx, "Research Agent");
        let v2 = ctx.context_version;
        assert!(v1 > v0);
        assert!(v2 > v1);
    }

    #[test]
    fn prune_context_never_removes_protected_fields() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        ctx.final_report = Some("report".to_string());
        StateManager::update_research_data(&mut ctx, "AAPL", serde_json::json!({"x": 1}), sample_metadata());
        StateManager::add_citation(
            &mut ctx,
            Citation {
                source: "yahoo_finance".into(),
                url: None,
                date: Utc::now(),
                agent: None,
                data_point: None,
                symbol: Some("AAPL".into()),
            },
        );
        StateManager::prune_context(&mut ctx, 1);
        assert_eq!(ctx.final_report.as_deref(), Some("report"));
        assert!(ctx.research_data.contains_key("AAPL"));
        assert_eq!(ctx.citations.len(), 1);
    }

    #[test]
    fn prune_context_is_idempotent_with_no_intervening_writes() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        for i in 0..200 {
            StateManager::add_progress_event(
                &mut ctx,
                ProgressTracker::task_progress("Research Agent", &format!("step {}", i), None, None, "tx"),
            );
        }
        StateManager::prune_context(&mut ctx, 1);
        let first_pass = ctx.progress_events.len();
        StateManager::prune_context(&mut ctx, 1);
        assert_eq!(ctx.progress_events.len(), first_pass);
    }

    #[test]
    fn prune_context_truncates_long_reasoning_to_500_chars_plus_ellipsis() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        ctx.analysis_reasoning.insert("AAPL".into(), "x".repeat(2000));
        StateManager::prune_context(&mut ctx, 1);
        let reasoning = &ctx.analysis_reasoning["AAPL"];
        assert!(reasoning.chars().count() <= 501);
        assert!(reasoning.ends_with('…'));
    }

    #[test]
    fn merge_parallel_contexts_is_order_independent_on_map_fields() {
        let base = StateManager::create_initial("Compare AAPL MSFT", None, None, Some("abcd1234".into()), None);
        let mut a = base.clone();
        StateManager::update_research_data(&mut a, "AAPL", serde_json::json!({"p": 1}), sample_metadata());
        let mut b = base.clone();
        StateManager::update_research_data(&mut b, "MSFT", serde_json::json!({"p": 2}), sample_metadata());

        let merged_ab = StateManager::merge_parallel_contexts(vec![a.clone(), b.clone()]);
        let merged_ba = StateManager::merge_parallel_contexts(vec![b, a]);

        assert_eq!(merged_ab.research_data.len(), merged_ba.research_data.len());
        assert_eq!(
            merged_ab.research_data.get("AAPL"),
            merged_ba.research_data.get("AAPL")
        );
        assert_eq!(
            merged_ab.research_data.get("MSFT"),
            merged_ba.research_data.get("MSFT")
        );
    }

    #[test]
    fn merge_parallel_contexts_sets_partial_success_when_any_symbol_failed() {
        let base = StateManager::create_initial("Compare AAPL MSFT", None, None, None, None);
        let mut a = base.clone();
        a.symbol_status.insert("AAPL".into(), SymbolStatus::Success);
        let mut b = base;
        b.symbol_status.insert("MSFT".into(), SymbolStatus::Failed);
        let merged = StateManager::merge_parallel_contexts(vec![a, b]);
        assert!(merged.partial_success);
    }

    #[test]
    fn merge_incremental_state_preserves_prior_report_when_new_is_empty() {
        let prev = {
            let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
            ctx.final_report = Some("prior report".into());
            ctx
        };
        let new = StateManager::create_initial("Analyze AAPL again", None, None, None, None);
        let merged = StateManager::merge_incremental_state(&prev, new);
        assert_eq!(merged.final_report.as_deref(), Some("prior report"));
        assert!(merged.is_incremental);
    }

    #[test]
    fn merge_incremental_state_unions_symbols_preserving_order() {
        let prev = StateManager::create_initial("Analyze AAPL", None, Some(vec!["AAPL".into()]), None, None);
        let new = StateManager::create_initial(
            "Compare AAPL MSFT",
            None,
            Some(vec!["MSFT".into(), "AAPL".into()]),
            None,
            None,
        );
        let merged = StateManager::merge_incremental_state(&prev, new);
        assert_eq!(merged.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }
}
