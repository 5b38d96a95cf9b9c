//! Reporting agent (§4.10): synthesizes research, analysis, and comparison output into the
//! final report. The only agent that calls the LLM for free-text generation rather than a
//! narrow structured completion - everything else in the pipeline is either a data fetch or a
//! small classification call.

use super::{with_agent_lifecycle, PipelineAgent};
use crate::error::GuardrailsError;
use crate::guardrails;
use crate::integration_config::IntegrationConfig;
use crate::llm_gateway::{ChatMessage, LlmGateway};
use crate::state::SharedContext;
use crate::tracking::Citation;
use crate::vector_store::VectorStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const REPORT_MODEL: &str = "gpt-4o";
const REPORT_MAX_TOKENS: u32 = 2000;
const TOP_CITATIONS: usize = 10;
const REPORT_SECTIONS: &[&str] = &[
    "Executive Summary",
    "Company Overview",
    "Financial Analysis",
    "Sentiment Analysis",
    "Trends",
    "Recommendation",
    "Risk",
    "Sources",
];

fn summarize_research(ctx: &SharedContext) -> String {
    ctx.symbols
        .iter()
        .map(|symbol| {
            let research = ctx.research_data.get(symbol);
            let price = research.and_then(|r| r.get("stock_price")).and_then(|p| p.get("currentPrice"));
            let sector = research.and_then(|r| r.get("company_info")).and_then(|c| c.get("sector"));
            format!(
                "- {}: price={}, sector={}",
                symbol,
                price.map(|v| v.to_string()).unwrap_or_else(|| "unavailable".to_string()),
                sector.and_then(Value::as_str).unwrap_or("unavailable")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize_analysis(ctx: &SharedContext) -> String {
    ctx.symbols
        .iter()
        .filter_map(|symbol| {
            let analysis = ctx.analysis_results.get(symbol)?;
            Some(format!(
                "- {}: recommendation={:?} ({}), sentiment={}",
                symbol,
                analysis.recommendation.action,
                analysis.recommendation.confidence,
                analysis.sentiment.as_ref().and_then(|s| s.get("sentiment")).and_then(Value::as_str).unwrap_or("neutral"),
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn top_citations(ctx: &SharedContext, n: usize) -> Vec<&Citation> {
    ctx.citations.iter().rev().take(n).collect()
}

fn citation_block(citations: &[&Citation]) -> String {
    citations
        .iter()
        .map(|c| {
            format!(
                "[Source: {}: {}]",
                c.source,
                c.data_point.as_deref().unwrap_or("data"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn system_prompt(ctx: &SharedContext, integration_config: &IntegrationConfig) -> String {
    let enabled: Vec<&str> = ["yahoo_finance", "alpha_vantage", "fmp"]
        .into_iter()
        .filter(|name| integration_config.is_enabled(name))
        .collect();
    let mut data_types: Vec<&str> = ctx
        .research_data
        .values()
        .flat_map(|v| v.as_object().map(|obj| obj.keys().map(String::as_str).collect::<Vec<_>>()).unwrap_or_default())
        .collect();
    data_types.sort_unstable();
    data_types.dedup();

    format!(
        "You are the Reporting agent of a financial research workflow. Enabled data integrations: {}. \
         Data types available this run: {}. Write the report in exactly this section order: {}. \
         Attribute every factual data point inline using the format [Source: <name>: <data point>], \
         drawing only from the citations given to you - never invent a source.",
        enabled.join(", "),
        data_types.join(", "),
        REPORT_SECTIONS.join(", "),
    )
}

fn fallback_report(ctx: &SharedContext) -> String {
    format!(
        "Executive Summary\nAutomated report generation was unavailable for this query. \
         The following symbols were analyzed: {}. Raw research and analysis data remain available \
         in the underlying context.\n\nSources\n{}",
        ctx.symbols.join(", "),
        citation_block(&top_citations(ctx, TOP_CITATIONS)),
    )
}

fn comparison_chart_for(symbol: &str, ctx: &SharedContext) -> Value {
    let research = ctx.research_data.get(symbol);
    let price = research.and_then(|r| r.pointer("/stock_price/currentPrice")).cloned().unwrap_or(Value::Null);
    let market_cap = research
        .and_then(|r| r.pointer("/stock_price/marketCap").or_else(|| r.pointer("/company_info/marketCap")))
        .cloned()
        .unwrap_or(Value::Null);
    let volume = research.and_then(|r| r.pointer("/stock_price/volume")).cloned().unwrap_or(Value::Null);
    serde_json::json!({"price": price, "marketCap": market_cap, "volume": volume})
}

fn build_visualizations(ctx: &SharedContext) -> Value {
    let mut price_trends = serde_json::Map::new();
    let mut sentiment_charts = serde_json::Map::new();
    let mut comparison_charts = serde_json::Map::new();
    for symbol in &ctx.symbols {
        if let Some(historical) = ctx.research_data.get(symbol).and_then(|r| r.get("historical_data")) {
            price_trends.insert(symbol.clone(), historical.clone());
        }
        if let Some(sentiment) = ctx.sentiment_analysis.get(symbol) {
            sentiment_charts.insert(symbol.clone(), sentiment.clone());
        }
        comparison_charts.insert(symbol.clone(), comparison_chart_for(symbol, ctx));
    }
    serde_json::json!({
        "price_trends": price_trends,
        "comparison_charts": comparison_charts,
        "sentiment_charts": sentiment_charts,
    })
}

pub struct ReportingAgent {
    llm: Arc<dyn LlmGateway>,
    vector_store: Arc<dyn VectorStore>,
    integration_config: Arc<IntegrationConfig>,
}

impl ReportingAgent {
    pub fn new(llm: Arc<dyn LlmGateway>, vector_store: Arc<dyn VectorStore>, integration_config: Arc<IntegrationConfig>) -> Self {
        ReportingAgent { llm, vector_store, integration_config }
    }

    async fn generate_report(&self, ctx: &SharedContext) -> String {
        let citations = top_citations(ctx, TOP_CITATIONS);
        let user_prompt = format!(
            "Query: {}\n\nResearch summary:\n{}\n\nAnalysis summary:\n{}\n\nComparison insights:\n{}\n\nAvailable citations:\n{}",
            ctx.query_text,
            summarize_research(ctx),
            summarize_analysis(ctx),
            ctx.comparison_data.as_ref().map(|c| c.insights.clone()).unwrap_or_default(),
            citation_block(&citations),
        );
        let messages = [ChatMessage::system(system_prompt(ctx, &self.integration_config)), ChatMessage::user(user_prompt)];

        match self.llm.complete(&messages, REPORT_MODEL, 0.3, REPORT_MAX_TOKENS).await {
            Ok(response) => match guardrails::validate_agent_output(&response.content, "Reporting") {
                Ok(()) => response.content,
                Err(err) => {
                    log::warn!("reporting agent: generated report failed validation, using fallback: {}", err);
                    fallback_report(ctx)
                }
            },
            Err(err) => {
                log::warn!("reporting agent: LLM completion failed, using fallback report: {}", err);
                fallback_report(ctx)
            }
        }
    }

    async fn index_report(&self, ctx: &SharedContext, report: &str) {
        let embedding = self.llm.embed(report).await;
        let mut metadata = HashMap::new();
        metadata.insert("symbols".to_string(), Value::String(ctx.symbols.join(",")));
        metadata.insert("transactionId".to_string(), Value::String(ctx.transaction_id.clone()));
        metadata.insert("queryType".to_string(), Value::String(format!("{:?}", ctx.query_type)));
        if let Err(err) = self.vector_store.add_document("company_analysis", report, metadata, None, embedding).await {
            log::warn!("reporting agent: failed to index report: {}", err);
        }
    }

    async fn run_reporting(&self, mut ctx: SharedContext) -> SharedContext {
        let report = self.generate_report(&ctx).await;
        self.index_report(&ctx, &report).await;
        ctx.visualizations = Some(build_visualizations(&ctx));
        ctx.final_report = Some(report);
        ctx.context_version += 1;
        ctx
    }
}

#[async_trait::async_trait]
impl PipelineAgent for ReportingAgent {
    fn name(&self) -> &'static str {
        "Reporting Agent"
    }

    fn validate_required_context(&self, ctx: &SharedContext) -> Result<(), GuardrailsError> {
        if ctx.research_data.is_empty() && ctx.analysis_results.is_empty() {
            return Err(GuardrailsError::StateInvalid("research_data and analysis_results".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: SharedContext) -> SharedContext {
        with_agent_lifecycle(ctx, self.name(), |ctx| self.run_reporting(ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateManager;

    #[test]
    fn citation_block_formats_bracketed_attributions() {
        let citation = Citation {
            source: "yahoo_finance".to_string(),
            url: None,
            date: chrono::Utc::now(),
            agent: None,
            data_point: Some("stock_price".to_string()),
            symbol: Some("AAPL".to_string()),
        };
        let block = citation_block(&[&citation]);
        assert_eq!(block, "[Source: yahoo_finance: stock_price]");
    }

    #[test]
    fn top_citations_returns_most_recent_first_up_to_n() {
        let mut ctx = StateManager::create_initial("Analyze AAPL", None, None, None, None);
        for i in 0..15 {
            StateManager::add_citation(
                &mut ctx,
                Citation {
                    source: "yahoo_finance".to_string(),
                    url: None,
                    date: chrono::Utc::now(),
                    agent: None,
                    data_point: Some(format!("point{}", i)),
                    symbol: None,
                },
            );
        }
        let top = top_citations(&ctx, TOP_CITATIONS);
        assert_eq!(top.len(), TOP_CITATIONS);
        assert_eq!(top[0].data_point.as_deref(), Some("point14"));
    }

    #[test]
    fn fallback_report_lists_symbols_and_sources_section() {
        let ctx = StateManager::create_initial("Analyze AAPL", None, Some(vec!["AAPL".to_string()]), None, None);
        let report = fallback_report(&ctx);
        assert!(report.contains("AAPL"));
        assert!(report.contains("Sources"));
    }
}
