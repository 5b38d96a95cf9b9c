//! The fixed Research -> Analyst -> Comparison -> Reporting pipeline (§4.7-§4.10).
//!
//! Per the re-architecture note in §9, the four agents share a capability set -
//! `validateRequiredContext`, progress reporting, `callLLM`, `run` - but are modeled as four
//! independent [`PipelineAgent`] implementations rather than an inheritance hierarchy. Nothing
//! here calls into a sibling agent's internals; each `execute` body is self-contained.

pub mod analyst;
pub mod comparison;
pub mod reporting;
pub mod research;

use crate::error::GuardrailsError;
use crate::progress::ProgressTracker;
use crate::state::SharedContext;
use crate::tracking::Citation;
use async_trait::async_trait;
use chrono::Utc;

/// Worker budget for the data-fetching fan-out in the Research agent: `min(|symbols| * 5, 20)`.
pub fn data_fetch_worker_budget(symbol_count: usize) -> usize {
    (symbol_count * 5).min(20)
}

/// Worker budget for the Analyst agent's four-subtask-per-symbol fan-out: `min(|symbols| * 4, 16)`.
pub fn analysis_worker_budget(symbol_count: usize) -> usize {
    (symbol_count * 4).min(16)
}

#[async_trait]
pub trait PipelineAgent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checked before `execute` runs; a failure here means the agent never starts and the
    /// workflow surfaces the error without emitting an `agent_start` event for this agent.
    fn validate_required_context(&self, ctx: &SharedContext) -> Result<(), GuardrailsError>;

    async fn execute(&self, ctx: SharedContext) -> SharedContext;
}

/// Push `agent_start`, run `body`, then push `agent_complete` and an execution-order entry -
/// every concrete agent's `execute` opens and closes with this so timing and progress events
/// stay consistent across all four.
pub async fn with_agent_lifecycle<F, Fut>(mut ctx: SharedContext, agent_name: &str, body: F) -> SharedContext
where
    F: FnOnce(SharedContext) -> Fut,
    Fut: std::future::Future<Output = SharedContext>,
{
    use crate::state::StateManager;

    let execution_order = ctx.execution_order.len() as u32;
    let start = Utc::now();
    let transaction_id = ctx.transaction_id.clone();
    StateManager::add_progress_event(
        &mut ctx,
        ProgressTracker::agent_start(agent_name, execution_order, &transaction_id),
    );

    let mut ctx = body(ctx).await;

    let end = Utc::now();
    let elapsed_secs = (end - start).num_milliseconds() as f64 / 1000.0;
    StateManager::track_execution_time(&mut ctx, agent_name, elapsed_secs);
    StateManager::mark_agent_executed(&mut ctx, agent_name);
    StateManager::add_execution_order_entry(&mut ctx, agent_name, start, Some(end));
    let transaction_id = ctx.transaction_id.clone();
    StateManager::add_progress_event(
        &mut ctx,
        ProgressTracker::agent_complete(agent_name, elapsed_secs, execution_order, &transaction_id),
    );
    ctx
}

/// Dedup-merge a fan-out's collected citations into `ctx.citations`.
pub fn absorb_citations(ctx: &mut SharedContext, citations: Vec<Citation>) {
    ctx.citations.extend(citations);
    ctx.citations = crate::tracking::dedup_citations(std::mem::take(&mut ctx.citations));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_fetch_worker_budget_caps_at_twenty() {
        assert_eq!(data_fetch_worker_budget(1), 5);
        assert_eq!(data_fetch_worker_budget(10), 20);
        assert_eq!(data_fetch_worker_budget(100), 20);
    }

    #[test]
    fn analysis_worker_budget_caps_at_sixteen() {
        assert_eq!(analysis_worker_budget(1), 4);
        assert_eq!(analysis_worker_budget(10), 16);
        assert_eq!(analysis_worker_budget(100), 16);
    }
}
