//! Comparison agent (§4.9). Always runs, regardless of how many symbols the query resolved -
//! a single symbol gets a benchmark narrative against its own history and sector, multiple
//! symbols get a side-by-side table. Metrics and the table are extracted deterministically;
//! the narrative itself is LLM-authored, with the rule-based text as its degraded fallback.

use super::{with_agent_lifecycle, PipelineAgent};
use crate::error::GuardrailsError;
use crate::llm_gateway::{ChatMessage, LlmGateway};
use crate::state::{ComparisonData, ComparisonTable, ComparisonType, SharedContext, StateManager};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const COMPARISON_MODEL: &str = "gpt-4o-mini";

fn path<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |acc, seg| acc.get(seg))
}

fn metric_row(symbol: &str, ctx: &SharedContext) -> HashMap<String, Value> {
    let research = ctx.research_data.get(symbol).cloned().unwrap_or(Value::Null);
    let analysis = ctx.analysis_results.get(symbol);
    let mut row = HashMap::new();
    row.insert("Symbol".to_string(), Value::String(symbol.to_string()));
    row.insert(
        "Price".to_string(),
        path(&research, &["stock_price", "currentPrice"]).cloned().unwrap_or(Value::Null),
    );
    row.insert(
        "MarketCap".to_string(),
        path(&research, &["stock_price", "marketCap"])
            .or_else(|| path(&research, &["company_info", "marketCap"]))
            .cloned()
            .unwrap_or(Value::Null),
    );
    row.insert(
        "P/E".to_string(),
        path(&research, &["stock_price", "peRatio"]).cloned().unwrap_or(Value::Null),
    );
    row.insert(
        "Sector".to_string(),
        path(&research, &["company_info", "sector"]).cloned().unwrap_or(Value::Null),
    );
    row.insert(
        "Sentiment".to_string(),
        analysis
            .and_then(|a| a.sentiment.as_ref())
            .and_then(|s| s.get("sentiment"))
            .cloned()
            .unwrap_or(Value::Null),
    );
    row.insert(
        "Recommendation".to_string(),
        analysis.map(|a| Value::String(format!("{:?}", a.recommendation.action))).unwrap_or(Value::Null),
    );
    row
}

fn benchmark_prompt(symbol: &str, metrics: &Value, historical_patterns: &[Value]) -> String {
    format!(
        "Write a short benchmark comparison narrative for {} against its own recent history and sector. \
         Metrics: {}. Similar historical patterns on record: {}.",
        symbol,
        metrics,
        historical_patterns.len()
    )
}

fn side_by_side_prompt(symbols: &[String], rows: &[HashMap<String, Value>]) -> String {
    format!(
        "Write a short side-by-side comparison narrative for {}. Metric rows: {:?}.",
        symbols.join(", "),
        rows
    )
}

fn benchmark_insights(symbol: &str, ctx: &SharedContext) -> String {
    let Some(analysis) = ctx.analysis_results.get(symbol) else {
        return format!("No analysis available for {} to benchmark against.", symbol);
    };
    let change = path(&analysis.financial, &["changePercent"]).and_then(Value::as_f64);
    let sector = analysis.financial.get("sector").and_then(Value::as_str).unwrap_or("its sector");
    let sentiment = analysis.sentiment.as_ref().and_then(|s| s.get("sentiment")).and_then(Value::as_str).unwrap_or("neutral");
    let change_desc = match change {
        Some(pct) if pct > 0.0 => format!("up {:.2}%", pct),
        Some(pct) if pct < 0.0 => format!("down {:.2}%", pct.abs()),
        Some(_) => "flat".to_string(),
        None => "of unknown movement".to_string(),
    };
    format!(
        "{} is trading {} against recent history, with {} sentiment from current news coverage. \
         Relative to peers in {}, the {:?} recommendation reflects a {} confidence level.",
        symbol, change_desc, sentiment, sector, analysis.recommendation.action, analysis.recommendation.confidence
    )
}

fn side_by_side_insights(symbols: &[String], ctx: &SharedContext) -> String {
    let mut best: Option<(&str, f64)> = None;
    let mut worst: Option<(&str, f64)> = None;
    for symbol in symbols {
        let Some(analysis) = ctx.analysis_results.get(symbol) else { continue };
        let Some(change) = path(&analysis.financial, &["changePercent"]).and_then(Value::as_f64) else { continue };
        if best.map(|(_, b)| change > b).unwrap_or(true) {
            best = Some((symbol.as_str(), change));
        }
        if worst.map(|(_, w)| change < w).unwrap_or(true) {
            worst = Some((symbol.as_str(), change));
        }
    }
    match (best, worst) {
        (Some((top, top_pct)), Some((bottom, bottom_pct))) if top != bottom => format!(
            "Across {} symbols, {} leads with a {:.2}% move while {} lags at {:.2}%.",
            symbols.len(),
            top,
            top_pct,
            bottom,
            bottom_pct
        ),
        (Some((only, pct)), _) => format!("{} is the only symbol with comparable data, moving {:.2}%.", only, pct),
        _ => format!("Comparing {} symbols; insufficient price-change data to rank them.", symbols.len()),
    }
}

pub struct ComparisonAgent {
    llm: Arc<dyn LlmGateway>,
}

impl ComparisonAgent {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        ComparisonAgent { llm }
    }

    /// Ask the LLM for the narrative; fall back to the rule-based text on any completion
    /// error rather than failing the agent, matching the placeholder-on-failure policy used
    /// for sentiment and reporting.
    async fn narrative(&self, prompt: String, fallback: String) -> String {
        match self
            .llm
            .complete(&[ChatMessage::system("You are a financial comparison analyst."), ChatMessage::user(prompt)], COMPARISON_MODEL, 0.4, 400)
            .await
        {
            Ok(response) => response.content,
            Err(err) => {
                log::warn!("comparison agent: narrative completion failed, using rule-based fallback: {}", err);
                fallback
            }
        }
    }

    async fn run_comparison(&self, mut ctx: SharedContext) -> SharedContext {
        let valid_symbols: Vec<String> =
            ctx.symbols.iter().filter(|s| ctx.analysis_results.contains_key(s.as_str())).cloned().collect();

        let comparison_data = match valid_symbols.as_slice() {
            [] => ComparisonData {
                comparison_type: ComparisonType::Benchmark,
                symbol: ctx.symbols.first().cloned(),
                symbols: None,
                metrics: Value::Null,
                insights: "No symbols produced usable analysis data to compare.".to_string(),
                historical_patterns: None,
                comparison_table: None,
            },
            [symbol] => {
                let metrics = ctx.analysis_results.get(symbol).map(|a| a.financial.clone()).unwrap_or(Value::Null);
                let historical_patterns = ctx.analysis_results.get(symbol).map(|a| a.historical_context.clone()).unwrap_or_default();
                let insights = self
                    .narrative(benchmark_prompt(symbol, &metrics, &historical_patterns), benchmark_insights(symbol, &ctx))
                    .await;
                ComparisonData {
                    comparison_type: ComparisonType::Benchmark,
                    symbol: Some(symbol.clone()),
                    symbols: None,
                    metrics,
                    insights,
                    historical_patterns: Some(Value::Array(historical_patterns)),
                    comparison_table: None,
                }
            }
            symbols => {
                let rows: Vec<HashMap<String, Value>> = symbols.iter().map(|s| metric_row(s, &ctx)).collect();
                let metrics: Value = symbols
                    .iter()
                    .map(|s| (s.clone(), ctx.analysis_results.get(s).map(|a| a.financial.clone()).unwrap_or(Value::Null)))
                    .collect::<serde_json::Map<_, _>>()
                    .into();
                let insights = self.narrative(side_by_side_prompt(symbols, &rows), side_by_side_insights(symbols, &ctx)).await;
                ComparisonData {
                    comparison_type: ComparisonType::SideBySide,
                    symbol: None,
                    symbols: Some(symbols.to_vec()),
                    metrics,
                    insights,
                    historical_patterns: None,
                    comparison_table: Some(ComparisonTable {
                        columns: vec![
                            "Symbol".to_string(),
                            "Price".to_string(),
                            "MarketCap".to_string(),
                            "P/E".to_string(),
                            "Sector".to_string(),
                            "Sentiment".to_string(),
                            "Recommendation".to_string(),
                        ],
                        rows,
                    }),
                }
            }
        };

        ctx.comparison_data = Some(comparison_data);
        ctx.context_version += 1;
        ctx
    }
}

#[async_trait::async_trait]
impl PipelineAgent for ComparisonAgent {
    fn name(&self) -> &'static str {
        "Comparison Agent"
    }

    fn validate_required_context(&self, _ctx: &SharedContext) -> Result<(), GuardrailsError> {
        Ok(())
    }

    async fn execute(&self, ctx: SharedContext) -> SharedContext {
        with_agent_lifecycle(ctx, self.name(), |ctx| self.run_comparison(ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_gateway::CompletionResponse;
    use crate::error::LLMError;
    use crate::state::{AnalysisResult, Recommendation, RecommendationAction};

    struct StubLlm;

    #[async_trait::async_trait]
    impl LlmGateway for StubLlm {
        async fn complete(&self, _messages: &[ChatMessage], _model: &str, _temperature: f32, _max_tokens: u32) -> Result<CompletionResponse, LLMError> {
            Ok(CompletionResponse { content: "stub narrative".to_string(), prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 })
        }

        async fn embed(&self, _text: &str) -> Vec<f32> {
            vec![0.0; 8]
        }
    }

    fn agent() -> ComparisonAgent {
        ComparisonAgent::new(Arc::new(StubLlm))
    }

    fn ctx_with_symbols(symbols: &[&str]) -> SharedContext {
        let mut ctx = StateManager::create_initial(
            "Compare stocks",
            None,
            Some(symbols.iter().map(|s| s.to_string()).collect()),
            None,
            None,
        );
        for symbol in symbols {
            StateManager::update_analysis_results(
                &mut ctx,
                symbol,
                AnalysisResult {
                    financial: serde_json::json!({"changePercent": 1.5, "sector": "Technology"}),
                    sentiment: Some(serde_json::json!({"sentiment": "positive", "score": 0.4})),
                    trend: None,
                    historical_context: Vec::new(),
                    recommendation: Recommendation { action: RecommendationAction::Buy, confidence: "medium".to_string() },
                },
                "reasoning".to_string(),
            );
        }
        ctx
    }

    #[tokio::test]
    async fn single_symbol_produces_benchmark_comparison() {
        let agent = agent();
        let ctx = agent.run_comparison(ctx_with_symbols(&["AAPL"])).await;
        let data = ctx.comparison_data.unwrap();
        assert_eq!(data.comparison_type, ComparisonType::Benchmark);
        assert_eq!(data.symbol.as_deref(), Some("AAPL"));
        assert!(data.comparison_table.is_none());
        assert_eq!(data.insights, "stub narrative");
    }

    #[tokio::test]
    async fn multiple_symbols_produce_side_by_side_table() {
        let agent = agent();
        let ctx = agent.run_comparison(ctx_with_symbols(&["AAPL", "MSFT"])).await;
        let data = ctx.comparison_data.unwrap();
        assert_eq!(data.comparison_type, ComparisonType::SideBySide);
        let table = data.comparison_table.unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns[0], "Symbol");
        assert_eq!(data.insights, "stub narrative");
    }

    #[tokio::test]
    async fn no_valid_symbols_still_produces_a_placeholder_comparison() {
        let agent = agent();
        let ctx = StateManager::create_initial("Analyze AAPL", None, Some(vec!["AAPL".to_string()]), None, None);
        let ctx = agent.run_comparison(ctx).await;
        assert!(ctx.comparison_data.is_some());
    }
}
