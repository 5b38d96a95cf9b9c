//! Orchestrator (§4.11): wires the four pipeline agents into the fixed graph
//! `START -> research -> analyst -> comparison -> reporting -> END` and owns the
//! validate/create/run/persist workflow around it.
//!
//! The graph itself never branches and never retries a node - a per-symbol failure degrades
//! that symbol's status inside the shared context and the pipeline moves on regardless.

use crate::agents::analyst::AnalystAgent;
use crate::agents::comparison::ComparisonAgent;
use crate::agents::reporting::ReportingAgent;
use crate::agents::research::ResearchAgent;
use crate::agents::PipelineAgent;
use crate::cache::ContextCache;
use crate::config::CoreConfig;
use crate::error::WorkflowError;
use crate::guardrails;
use crate::integration_config::{self, IntegrationConfig};
use crate::llm_gateway::{LlmGateway, OpenAIGateway};
use crate::progress::ProgressEvent;
use crate::session_store::{self, HistoryRecord};
use crate::sources::unified::UnifiedDataClient;
use crate::state::{SharedContext, StateManager};
use crate::vector_store::{InMemoryVectorStore, VectorStore};
use futures_util::stream::{self, Stream};
use std::sync::Arc;

/// A snapshot emitted by [`Orchestrator::stream`] after a node completes.
pub struct NodeSnapshot {
    pub node: &'static str,
    pub context: SharedContext,
    pub latest_events: Vec<ProgressEvent>,
}

fn build_integration_config(config: &CoreConfig) -> IntegrationConfig {
    IntegrationConfig::new()
        .with_base_enabled(integration_config::ALPHA_VANTAGE, config.alpha_vantage_api_key.is_some())
        .with_base_enabled(integration_config::FMP, config.fmp_api_key.is_some())
}

/// The fixed four-node pipeline plus the validate/persist workflow around it.
pub struct Orchestrator {
    config: Arc<CoreConfig>,
    research: ResearchAgent,
    analyst: AnalystAgent,
    comparison: ComparisonAgent,
    reporting: ReportingAgent,
}

impl Orchestrator {
    /// Build every agent and its shared dependencies from `config`. Fails only if no LLM
    /// credential is configured - everything downstream of the LLM gateway degrades gracefully
    /// on its own, but there is no useful report to produce without one.
    pub fn from_config(config: Arc<CoreConfig>) -> Result<Self, WorkflowError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| WorkflowError::StateInvalid("OPENAI_API_KEY not configured".to_string()))?;

        let llm: Arc<dyn LlmGateway> = Arc::new(OpenAIGateway::new(&api_key, &config.embedding_model));
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(config.vector_query_cache_ttl_secs));
        let cache = Arc::new(ContextCache::new(config.context_cache_ttl_secs));

        let data_client = Arc::new(UnifiedDataClient::new(
            config.alpha_vantage_api_key.as_deref().unwrap_or(""),
            config.fmp_api_key.as_deref().unwrap_or(""),
            build_integration_config(&config),
        ));

        Ok(Orchestrator {
            research: ResearchAgent::new(data_client, vector_store.clone(), llm.clone(), cache),
            analyst: AnalystAgent::new(vector_store.clone(), llm.clone()),
            comparison: ComparisonAgent::new(llm.clone()),
            reporting: ReportingAgent::new(llm, vector_store, Arc::new(build_integration_config(&config))),
            config,
        })
    }

    fn prune_if_over_budget(&self, ctx: &mut SharedContext) {
        StateManager::calculate_context_size(ctx);
        if ctx.context_size_bytes > self.config.context_byte_budget {
            StateManager::prune_context(ctx, self.config.context_byte_budget);
        }
    }

    /// Run the fixed graph to completion and return the final state. Matches §4.11's
    /// `run(initialState)`: the orchestrator owns `initial_state` for the whole run and hands
    /// it, node by node, to each agent's `execute`.
    pub async fn run(&self, initial_state: SharedContext) -> Result<SharedContext, WorkflowError> {
        let mut ctx = initial_state;
        for agent in self.pipeline() {
            agent.validate_required_context(&ctx)?;
            ctx = agent.execute(ctx).await;
            self.prune_if_over_budget(&mut ctx);
        }
        Ok(ctx)
    }

    /// Run the graph, yielding a [`NodeSnapshot`] after each node completes. The whole pipeline
    /// runs eagerly up front - this crate's dependency set has no async-generator primitive -
    /// so this is a replay of a completed run rather than a live push feed; callers that need
    /// the latter should drive [`Orchestrator::run`] themselves node by node instead.
    pub async fn stream(&self, initial_state: SharedContext) -> Result<impl Stream<Item = NodeSnapshot>, WorkflowError> {
        let mut ctx = initial_state;
        let mut snapshots = Vec::with_capacity(self.pipeline().len());
        for agent in self.pipeline() {
            agent.validate_required_context(&ctx)?;
            let before = ctx.progress_events.len();
            ctx = agent.execute(ctx).await;
            self.prune_if_over_budget(&mut ctx);
            let latest_events = ctx.progress_events[before..].to_vec();
            snapshots.push(NodeSnapshot { node: agent.name(), context: ctx.clone(), latest_events });
        }
        Ok(stream::iter(snapshots))
    }

    fn pipeline(&self) -> Vec<&dyn PipelineAgent> {
        vec![&self.research, &self.analyst, &self.comparison, &self.reporting]
    }

    /// The full workflow described in §3's data-flow line: validate the raw query, build or
    /// resume a [`SharedContext`], run the graph, then persist the result when a session id is
    /// given. This is the entry point most callers want; [`Orchestrator::run`]/`stream` are the
    /// graph-only primitives underneath it.
    pub async fn process_query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<SharedContext, WorkflowError> {
        guardrails::validate_query(query)?;

        let initial = StateManager::create_initial(query, None, None, None, session_id.map(str::to_string));

        let initial = if let Some(session_id) = session_id {
            match session_store::load_state_for_session(&self.config.sessions_dir, session_id).await {
                Some(previous) => StateManager::merge_incremental_state(&previous, initial),
                None => initial,
            }
        } else {
            initial
        };

        let final_state = self.run(initial).await?;

        if let Some(session_id) = session_id {
            session_store::save_state_for_session(&self.config.sessions_dir, session_id, &final_state).await;
            session_store::save_query_to_history(
                &self.config.sessions_dir,
                session_id,
                HistoryRecord {
                    transaction_id: final_state.transaction_id.clone(),
                    query_text: query.to_string(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;
        }

        Ok(final_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_integration_config_disables_sources_with_no_api_key() {
        std::env::remove_var("ENABLE_ALPHA_VANTAGE");
        std::env::remove_var("ENABLE_FMP");
        let mut config = CoreConfig::from_env();
        config.alpha_vantage_api_key = None;
        config.fmp_api_key = Some("key".to_string());
        let integration_config = build_integration_config(&config);
        assert!(!integration_config.is_enabled("alpha_vantage"));
        assert!(integration_config.is_enabled("fmp"));
    }

    #[tokio::test]
    async fn from_config_rejects_missing_openai_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        let mut config = CoreConfig::from_env();
        config.openai_api_key = None;
        let result = Orchestrator::from_config(Arc::new(config));
        assert!(matches!(result, Err(WorkflowError::StateInvalid(_))));
    }
}
