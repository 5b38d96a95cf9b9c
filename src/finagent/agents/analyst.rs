//! Analyst agent (§4.8): four concurrent subtasks per symbol - historical-pattern lookup,
//! financial-metric extraction, sentiment analysis, and (when the query calls for it)
//! trend analysis - synthesized into a per-symbol [`AnalysisResult`] and recommendation.

use super::{analysis_worker_budget, with_agent_lifecycle, PipelineAgent};
use crate::error::GuardrailsError;
use crate::llm_gateway::{ChatMessage, LlmGateway};
use crate::progress::ProgressTracker;
use crate::state::{AnalysisResult, QueryType, Recommendation, RecommendationAction, SharedContext, StateManager};
use crate::vector_store::VectorStore;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const HISTORICAL_MATCHES: usize = 5;
const SENTIMENT_MODEL: &str = "gpt-4o-mini";

fn extract_financial_metrics(research: &Value) -> Value {
    let price = research.get("stock_price").cloned().unwrap_or(Value::Null);
    let company = research.get("company_info").cloned().unwrap_or(Value::Null);
    let financials = research.get("financial_statements").cloned().unwrap_or(Value::Null);
    serde_json::json!({
        "currentPrice": price.get("currentPrice"),
        "changePercent": price.get("changePercent"),
        "marketCap": price.get("marketCap").or_else(|| company.get("marketCap")),
        "sector": company.get("sector"),
        "industry": company.get("industry"),
        "statementType": financials.get("statementType"),
    })
}

fn sentiment_prompt(symbol: &str, news: &Value) -> String {
    let headlines: Vec<String> = news
        .get("articles")
        .and_then(Value::as_array)
        .map(|articles| {
            articles
                .iter()
                .filter_map(|a| a.get("title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    format!(
        "Classify the market sentiment for {} from these recent headlines. \
         Respond as JSON: {{\"sentiment\": \"positive\"|\"neutral\"|\"negative\", \"score\": -1.0..1.0, \"summary\": \"...\"}}.\n\n{}",
        symbol,
        headlines.join("\n")
    )
}

/// Parse the LLM's sentiment JSON; on any parse failure downgrade to a neutral placeholder built
/// from the first 200 characters of the raw response rather than failing the symbol.
fn parse_sentiment(raw: &str) -> Value {
    let cleaned = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");
    match serde_json::from_str::<Value>(cleaned.trim()) {
        Ok(value) if value.get("sentiment").is_some() => value,
        _ => {
            let summary: String = raw.chars().take(200).collect();
            serde_json::json!({"sentiment": "neutral", "score": 0.0, "summary": summary})
        }
    }
}

fn derive_recommendation(sentiment_score: f64) -> Recommendation {
    let action = if sentiment_score > 0.3 {
        RecommendationAction::Buy
    } else if sentiment_score < -0.3 {
        RecommendationAction::Sell
    } else {
        RecommendationAction::Hold
    };
    Recommendation { action, confidence: "medium".to_string() }
}

struct SymbolAnalysis {
    financial: Value,
    sentiment: Value,
    trend: Option<Value>,
    historical_context: Vec<Value>,
    reasoning: String,
}

pub struct AnalystAgent {
    vector_store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmGateway>,
}

impl AnalystAgent {
    pub fn new(vector_store: Arc<dyn VectorStore>, llm: Arc<dyn LlmGateway>) -> Self {
        AnalystAgent { vector_store, llm }
    }

    async fn historical_patterns(&self, symbol: &str, research: &Value) -> Vec<Value> {
        let query_text = format!("{} financial analysis", symbol);
        let embedding = self.llm.embed(&query_text).await;
        let mut filter = HashMap::new();
        filter.insert("symbol".to_string(), Value::String(symbol.to_string()));
        match self
            .vector_store
            .search_similar("company_analysis", &embedding, HISTORICAL_MATCHES, None)
            .await
        {
            Ok(hits) => hits
                .into_iter()
                .filter(|hit| hit.metadata.get("symbol") != Some(&Value::String(symbol.to_string())))
                .map(|hit| serde_json::json!({"document": hit.document, "metadata": hit.metadata, "distance": hit.distance}))
                .collect(),
            Err(err) => {
                log::warn!("analyst agent: historical pattern lookup failed for {}: {}", symbol, err);
                let _ = research;
                Vec::new()
            }
        }
    }

    async fn sentiment(&self, symbol: &str, research: &Value) -> Value {
        let news = research.get("news").cloned().unwrap_or(Value::Null);
        if news.is_null() {
            return serde_json::json!({"sentiment": "neutral", "score": 0.0, "summary": "no news available"});
        }
        let prompt = sentiment_prompt(symbol, &news);
        match self
            .llm
            .complete(&[ChatMessage::system("You are a financial sentiment classifier."), ChatMessage::user(prompt)], SENTIMENT_MODEL, 0.0, 300)
            .await
        {
            Ok(response) => parse_sentiment(&response.content),
            Err(err) => {
                log::warn!("analyst agent: sentiment completion failed for {}: {}", symbol, err);
                serde_json::json!({"sentiment": "neutral", "score": 0.0, "summary": "sentiment analysis unavailable"})
            }
        }
    }

    // The source's trend path only ever writes {periods, dataPoints, trend: "analyzing"} -
    // never a computed direction. Kept as the same stub here rather than inventing a
    // direction heuristic the source never had.
    fn trend(&self, query_type: QueryType, research: &Value) -> Option<Value> {
        if !matches!(query_type, QueryType::Trend | QueryType::Comparison) {
            return None;
        }
        let historical = research.get("historical_data")?;
        let periods = historical.get("period").cloned().unwrap_or(Value::Null);
        let data_points = historical
            .pointer("/data/close")
            .and_then(Value::as_array)
            .map(|values| values.len())
            .unwrap_or(0);
        Some(serde_json::json!({"periods": periods, "dataPoints": data_points, "trend": "analyzing"}))
    }

    async fn analyze_symbol(&self, symbol: String, query_type: QueryType, research: Value) -> (String, SymbolAnalysis) {
        let financial = extract_financial_metrics(&research);
        let (historical_context, sentiment) =
            futures_util::join!(self.historical_patterns(&symbol, &research), self.sentiment(&symbol, &research));
        let trend = self.trend(query_type, &research);

        let score = sentiment.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let reasoning = format!(
            "{} sentiment is {} (score {:.2}). Sector: {}. {} comparable prior analyses found.",
            symbol,
            sentiment.get("sentiment").and_then(Value::as_str).unwrap_or("neutral"),
            score,
            financial.get("sector").and_then(Value::as_str).unwrap_or("unknown"),
            historical_context.len(),
        );

        (symbol, SymbolAnalysis { financial, sentiment, trend, historical_context, reasoning })
    }

    async fn run_analysis(&self, ctx: SharedContext) -> SharedContext {
        let budget = analysis_worker_budget(ctx.symbols.len()).max(1);
        let query_type = ctx.query_type;
        let transaction_id = ctx.transaction_id.clone();

        let symbols_with_data: Vec<(String, Value)> = ctx
            .symbols
            .iter()
            .filter_map(|symbol| ctx.research_data.get(symbol).map(|data| (symbol.clone(), data.clone())))
            .collect();

        let results: Vec<(String, SymbolAnalysis)> = stream::iter(symbols_with_data)
            .map(|(symbol, research)| self.analyze_symbol(symbol, query_type, research))
            .buffer_unordered(budget)
            .collect()
            .await;

        let mut branches = Vec::with_capacity(results.len().max(1));
        for (symbol, analysis) in results {
            let mut branch = ctx.clone();
            let score = analysis.sentiment.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            let result = AnalysisResult {
                financial: analysis.financial,
                sentiment: Some(analysis.sentiment.clone()),
                trend: analysis.trend.clone(),
                historical_context: analysis.historical_context,
                recommendation: derive_recommendation(score),
            };
            StateManager::update_analysis_results(&mut branch, &symbol, result, analysis.reasoning);
            branch.sentiment_analysis.insert(symbol.clone(), analysis.sentiment);
            if let Some(trend) = analysis.trend {
                branch.trend_analysis.insert(symbol.clone(), trend);
            }
            StateManager::add_progress_event(
                &mut branch,
                ProgressTracker::task_complete("Analyst Agent", "analyze symbol", Some(&symbol), &transaction_id),
            );
            branches.push(branch);
        }

        if branches.is_empty() {
            return ctx;
        }
        StateManager::merge_parallel_contexts(branches)
    }
}

#[async_trait::async_trait]
impl PipelineAgent for AnalystAgent {
    fn name(&self) -> &'static str {
        "Analyst Agent"
    }

    fn validate_required_context(&self, ctx: &SharedContext) -> Result<(), GuardrailsError> {
        if ctx.research_data.is_empty() {
            return Err(GuardrailsError::StateInvalid("research_data".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: SharedContext) -> SharedContext {
        with_agent_lifecycle(ctx, self.name(), |ctx| self.run_analysis(ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_recommendation_applies_score_thresholds() {
        assert_eq!(derive_recommendation(0.5).action, RecommendationAction::Buy);
        assert_eq!(derive_recommendation(-0.5).action, RecommendationAction::Sell);
        assert_eq!(derive_recommendation(0.0).action, RecommendationAction::Hold);
    }

    #[test]
    fn parse_sentiment_downgrades_unparseable_response_to_neutral() {
        let parsed = parse_sentiment("not json at all");
        assert_eq!(parsed.get("sentiment").and_then(Value::as_str), Some("neutral"));
        assert_eq!(parsed.get("score").and_then(Value::as_f64), Some(0.0));
    }

    #[test]
    fn parse_sentiment_accepts_fenced_json() {
        let parsed = parse_sentiment("```json\n{\"sentiment\": \"positive\", \"score\": 0.6, \"summary\": \"good\"}\n```");
        assert_eq!(parsed.get("sentiment").and_then(Value::as_str), Some("positive"));
    }

    #[test]
    fn extract_financial_metrics_reads_nested_research_fields() {
        let research = serde_json::json!({
            "stock_price": {"currentPrice": 150.0, "changePercent": 1.2},
            "company_info": {"sector": "Technology"},
        });
        let metrics = extract_financial_metrics(&research);
        assert_eq!(metrics.get("currentPrice").and_then(Value::as_f64), Some(150.0));
        assert_eq!(metrics.get("sector").and_then(Value::as_str), Some("Technology"));
    }
}
