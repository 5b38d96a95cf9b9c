//! Research agent (§4.7): per-symbol, per-data-type fan-out over [`UnifiedDataClient`].
//!
//! Every `(symbol, data_type)` pair the current query needs is a unit of work competing for the
//! same bounded worker pool (`min(|symbols| * 5, 20)`), so a query over many symbols does not
//! starve a query over few - the pool is sized once per run, not once per symbol. Results are
//! folded back per-symbol into independent context branches and recombined with
//! [`StateManager::merge_parallel_contexts`], exactly the ownership model `state.rs` documents
//! for fan-out workers.

use super::{absorb_citations, data_fetch_worker_budget, with_agent_lifecycle, PipelineAgent};
use crate::cache::ContextCache;
use crate::error::GuardrailsError;
use crate::llm_gateway::LlmGateway;
use crate::progress::ProgressTracker;
use crate::sources::unified::UnifiedDataClient;
use crate::sources::DataType;
use crate::state::{DataQuality, QueryType, ResearchMetadata, SharedContext, StateManager};
use crate::vector_store::VectorStore;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const NEWS_ARTICLES_PER_SYMBOL: usize = 5;
const DEFAULT_STATEMENT_TYPE: &str = "income_statement";

fn required_data_types(query_type: QueryType) -> Vec<DataType> {
    let mut types = vec![DataType::StockPrice, DataType::CompanyInfo, DataType::News];
    if matches!(query_type, QueryType::Trend | QueryType::Comparison) {
        types.push(DataType::HistoricalData);
    }
    if matches!(query_type, QueryType::SingleStock | QueryType::Comparison) {
        types.push(DataType::FinancialStatements);
    }
    types
}

struct FetchOutcome {
    symbol: String,
    data_type: DataType,
    payload: Option<Value>,
    source: Option<String>,
    events: Vec<crate::progress::ProgressEvent>,
    error: Option<String>,
}

fn article_text(article: &Value) -> String {
    let title = article.get("title").and_then(Value::as_str).unwrap_or("");
    let body = article
        .get("summary")
        .or_else(|| article.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    format!("{}\n\n{}", title, body).trim().to_string()
}

fn article_url(article: &Value) -> Option<String> {
    article.get("link").or_else(|| article.get("url")).and_then(Value::as_str).map(str::to_string)
}

fn article_publisher(article: &Value) -> Option<String> {
    article.get("publisher").or_else(|| article.get("site")).and_then(Value::as_str).map(str::to_string)
}

pub struct ResearchAgent {
    data_client: Arc<UnifiedDataClient>,
    vector_store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmGateway>,
    cache: Arc<ContextCache>,
}

impl ResearchAgent {
    pub fn new(
        data_client: Arc<UnifiedDataClient>,
        vector_store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmGateway>,
        cache: Arc<ContextCache>,
    ) -> Self {
        ResearchAgent { data_client, vector_store, llm, cache }
    }

    async fn fetch_one(&self, symbol: String, data_type: DataType, transaction_id: String) -> FetchOutcome {
        if let Some(cached) = self.cache.get(&symbol, data_type.as_str()).await {
            return FetchOutcome {
                symbol,
                data_type,
                payload: Some(cached),
                source: Some("cache".to_string()),
                events: Vec::new(),
                error: None,
            };
        }

        let result = match data_type {
            DataType::StockPrice => self.data_client.get_stock_price(&symbol, &transaction_id, None).await,
            DataType::CompanyInfo => self.data_client.get_company_info(&symbol, &transaction_id, None).await,
            DataType::HistoricalData => self.data_client.get_historical_data(&symbol, &transaction_id, None).await,
            DataType::FinancialStatements => {
                self.data_client
                    .get_financials(&symbol, DEFAULT_STATEMENT_TYPE, &transaction_id, None)
                    .await
            }
            DataType::News => self.data_client.get_news(&symbol, NEWS_ARTICLES_PER_SYMBOL, &transaction_id, None).await,
            DataType::TechnicalIndicators => unreachable!("research agent never fetches technical indicators"),
        };

        match result {
            Ok(call) => {
                self.cache.put(&symbol, data_type.as_str(), call.payload.clone()).await;
                FetchOutcome {
                    symbol,
                    data_type,
                    payload: Some(call.payload),
                    source: Some(call.source),
                    events: call.events,
                    error: None,
                }
            }
            Err(err) => FetchOutcome {
                symbol,
                data_type,
                payload: None,
                source: None,
                events: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    /// Embed and insert every fetched news article into the `financial_news` collection.
    /// Best-effort: an embedding failure degrades to a zero vector (per `LlmGateway::embed`'s
    /// contract) and an insertion failure is logged and skipped rather than failing the agent.
    async fn index_news(&self, symbol: &str, source: &str, news_payload: &Value) {
        let articles = match news_payload.get("articles").and_then(Value::as_array) {
            Some(articles) => articles,
            None => return,
        };
        for article in articles {
            let text = article_text(article);
            if text.is_empty() {
                continue;
            }
            let embedding = self.llm.embed(&text).await;
            let mut metadata = HashMap::new();
            metadata.insert("symbol".to_string(), Value::String(symbol.to_string()));
            metadata.insert("source".to_string(), Value::String(source.to_string()));
            if let Some(title) = article.get("title").cloned() {
                metadata.insert("title".to_string(), title);
            }
            if let Some(url) = article_url(article) {
                metadata.insert("url".to_string(), Value::String(url));
            }
            if let Some(publisher) = article_publisher(article) {
                metadata.insert("publisher".to_string(), Value::String(publisher));
            }
            if let Some(published) = article.get("publishedDate").cloned() {
                metadata.insert("publishedDate".to_string(), published);
            }
            if let Err(err) = self.vector_store.add_document("financial_news", &text, metadata, None, embedding).await {
                log::warn!("research agent: failed to index news article for {}: {}", symbol, err);
            }
        }
    }

    async fn run_research(&self, ctx: SharedContext) -> SharedContext {
        let data_types = required_data_types(ctx.query_type);
        let items: Vec<(String, DataType)> = ctx
            .symbols
            .iter()
            .flat_map(|symbol| data_types.iter().map(move |dt| (symbol.clone(), *dt)))
            .collect();
        let budget = data_fetch_worker_budget(ctx.symbols.len()).max(1);
        let transaction_id = ctx.transaction_id.clone();

        let outcomes: Vec<FetchOutcome> = stream::iter(items)
            .map(|(symbol, data_type)| {
                let tx = transaction_id.clone();
                async move { self.fetch_one(symbol, data_type, tx).await }
            })
            .buffer_unordered(budget)
            .collect()
            .await;

        let mut by_symbol: HashMap<String, Vec<FetchOutcome>> = HashMap::new();
        for outcome in outcomes {
            by_symbol.entry(outcome.symbol.clone()).or_default().push(outcome);
        }

        let mut branches = Vec::with_capacity(ctx.symbols.len().max(1));
        for (idx, symbol) in ctx.symbols.iter().enumerate() {
            let mut branch = ctx.clone();
            let symbol_outcomes = by_symbol.remove(symbol).unwrap_or_default();
            let attempted = symbol_outcomes.len();

            let mut sources_used = Vec::new();
            let mut payload = serde_json::Map::new();
            for outcome in &symbol_outcomes {
                if let (Some(value), Some(source)) = (&outcome.payload, &outcome.source) {
                    payload.insert(outcome.data_type.as_str().to_string(), value.clone());
                    if !sources_used.contains(source) {
                        sources_used.push(source.clone());
                    }
                }
            }

            for outcome in &symbol_outcomes {
                for event in outcome.events.clone() {
                    StateManager::add_progress_event(&mut branch, event);
                }
            }

            let succeeded = payload.len();
            if succeeded == 0 {
                branch.symbol_status.insert(symbol.clone(), crate::state::SymbolStatus::Failed);
                let errors: Vec<String> = symbol_outcomes.iter().filter_map(|o| o.error.clone()).collect();
                branch.symbol_errors.insert(symbol.clone(), errors.join("; "));
            } else {
                branch.symbol_status.insert(symbol.clone(), crate::state::SymbolStatus::Success);
                let data_quality = if succeeded == attempted { DataQuality::Complete } else { DataQuality::Partial };
                StateManager::update_research_data(
                    &mut branch,
                    symbol,
                    Value::Object(payload.clone()),
                    ResearchMetadata { sources: sources_used.clone(), timestamp: Utc::now(), data_quality },
                );

                if let Some(news) = payload.get("news") {
                    let source = sources_used.first().cloned().unwrap_or_default();
                    self.index_news(symbol, &source, news).await;
                }
            }

            StateManager::add_progress_event(
                &mut branch,
                ProgressTracker::task_complete("Research Agent", "fetch research data", Some(symbol), &transaction_id),
            );

            if idx == 0 {
                let citations = self.data_client.drain_citations().await;
                absorb_citations(&mut branch, citations);
            }
            branches.push(branch);
        }

        if branches.is_empty() {
            return ctx;
        }
        StateManager::merge_parallel_contexts(branches)
    }
}

#[async_trait::async_trait]
impl PipelineAgent for ResearchAgent {
    fn name(&self) -> &'static str {
        "Research Agent"
    }

    fn validate_required_context(&self, ctx: &SharedContext) -> Result<(), GuardrailsError> {
        if ctx.query_text.trim().is_empty() {
            return Err(GuardrailsError::StateInvalid("query_text".to_string()));
        }
        if ctx.symbols.is_empty() {
            return Err(GuardrailsError::StateInvalid("symbols".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: SharedContext) -> SharedContext {
        with_agent_lifecycle(ctx, self.name(), |ctx| self.run_research(ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_data_types_gates_historical_and_financials_on_query_type() {
        assert_eq!(
            required_data_types(QueryType::SingleStock),
            vec![DataType::StockPrice, DataType::CompanyInfo, DataType::News, DataType::FinancialStatements]
        );
        assert_eq!(
            required_data_types(QueryType::Trend),
            vec![DataType::StockPrice, DataType::CompanyInfo, DataType::News, DataType::HistoricalData]
        );
        assert_eq!(
            required_data_types(QueryType::Comparison),
            vec![
                DataType::StockPrice,
                DataType::CompanyInfo,
                DataType::News,
                DataType::HistoricalData,
                DataType::FinancialStatements
            ]
        );
        assert_eq!(
            required_data_types(QueryType::Sentiment),
            vec![DataType::StockPrice, DataType::CompanyInfo, DataType::News]
        );
    }

    #[test]
    fn article_text_falls_back_between_yahoo_and_fmp_field_names() {
        let yahoo_shaped = serde_json::json!({"title": "t", "summary": "s"});
        assert_eq!(article_text(&yahoo_shaped), "t\n\ns");
        let fmp_shaped = serde_json::json!({"title": "t", "text": "b"});
        assert_eq!(article_text(&fmp_shaped), "t\n\nb");
    }

    #[test]
    fn article_url_falls_back_between_link_and_url() {
        assert_eq!(article_url(&serde_json::json!({"link": "https://a"})), Some("https://a".to_string()));
        assert_eq!(article_url(&serde_json::json!({"url": "https://b"})), Some("https://b".to_string()));
    }
}
