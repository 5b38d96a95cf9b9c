//! Single entry point agents call into for finance data (§4.6).
//!
//! Walks the preferred-source order from [`crate::integration_config::IntegrationConfig`],
//! short-circuiting on the first non-empty result. Every attempt (skip, start, success, failure)
//! is recorded as a [`ProgressEvent`] handed back to the caller, since `UnifiedDataClient` has no
//! access to the shared context it runs inside of.

use super::alpha_vantage::AlphaVantageClient;
use super::fmp::FmpClient;
use super::yahoo::YahooFinanceClient;
use super::{retry_source_call, DataType, SourceClient};
use crate::error::{AllSourcesFailed, GuardrailsError, NoSources, SourceError};
use crate::guardrails;
use crate::integration_config::IntegrationConfig;
use crate::progress::{EventStatus, EventType, ProgressEvent, ProgressTracker};
use serde_json::Value;

/// Everything `UnifiedDataClient` can fail with; distinct from [`SourceError`] because by the
/// time it surfaces here every candidate source has already been tried.
#[derive(Debug, Clone)]
pub enum UnifiedError {
    Guardrails(GuardrailsError),
    NoSources(NoSources),
    AllSourcesFailed(AllSourcesFailed),
}

impl std::fmt::Display for UnifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnifiedError::Guardrails(e) => write!(f, "{}", e),
            UnifiedError::NoSources(e) => write!(f, "{}", e),
            UnifiedError::AllSourcesFailed(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for UnifiedError {}

/// Result of a successful dispatch: the normalized payload, which source served it, and the
/// progress events generated along the way (including any failed attempts before the winner).
pub struct SourceCallResult {
    pub payload: Value,
    pub source: String,
    pub events: Vec<ProgressEvent>,
}

pub struct UnifiedDataClient {
    yahoo: YahooFinanceClient,
    alpha_vantage: AlphaVantageClient,
    fmp: FmpClient,
    integration_config: IntegrationConfig,
}

impl UnifiedDataClient {
    pub fn new(alpha_vantage_api_key: &str, fmp_api_key: &str, integration_config: IntegrationConfig) -> Self {
        UnifiedDataClient {
            yahoo: YahooFinanceClient::new(),
            alpha_vantage: AlphaVantageClient::new(alpha_vantage_api_key),
            fmp: FmpClient::new(fmp_api_key),
            integration_config,
        }
    }

    fn client_by_name(&self, name: &str) -> Option<&dyn SourceClient> {
        match name {
            "yahoo_finance" => Some(&self.yahoo),
            "alpha_vantage" => Some(&self.alpha_vantage),
            "fmp" => Some(&self.fmp),
            _ => None,
        }
    }

    /// Drain every citation accumulated across all three underlying clients since the last
    /// drain. Callers own the resulting list from this point - nothing here deduplicates it.
    pub async fn drain_citations(&self) -> Vec<crate::tracking::Citation> {
        let mut citations = self.yahoo.citations().drain().await;
        citations.extend(self.alpha_vantage.citations().drain().await);
        citations.extend(self.fmp.citations().drain().await);
        citations
    }

    /// The *full* preferred order for `data_type` - enabled and disabled sources alike - with
    /// `preferred_source` moved to the front if it appears in the mapping. Disabled sources stay
    /// in this list so the dispatch loop can emit `api_call_skipped` for each of them (§4.6 step
    /// 4) rather than silently never trying, and never mentioning, them.
    fn ordered_candidates(&self, data_type: DataType, preferred_source: Option<&str>) -> Vec<&'static str> {
        let mut sources: Vec<&'static str> = self
            .integration_config
            .data_source_mapping()
            .get(data_type.as_str())
            .map(|entry| entry.preferred.to_vec())
            .unwrap_or_default();
        if let Some(preferred) = preferred_source {
            if let Some(pos) = sources.iter().position(|s| *s == preferred) {
                let promoted = sources.remove(pos);
                sources.insert(0, promoted);
            }
        }
        sources
    }

    fn require_candidates(
        &self,
        data_type: DataType,
        preferred_source: Option<&str>,
    ) -> Result<Vec<&'static str>, UnifiedError> {
        let candidates = self.ordered_candidates(data_type, preferred_source);
        if candidates.is_empty() || !candidates.iter().any(|name| self.integration_config.is_enabled(name)) {
            return Err(UnifiedError::NoSources(NoSources { data_type: data_type.as_str().to_string() }));
        }
        Ok(candidates)
    }

    fn skipped_event(&self, name: &str, symbol: &str, data_type: DataType, transaction_id: &str) -> ProgressEvent {
        ProgressTracker::api_call(
            EventType::ApiCallSkipped,
            name,
            symbol,
            Some(data_type.as_str()),
            EventStatus::Skipped,
            None,
            None,
            None,
            transaction_id,
        )
    }

    fn start_event(&self, name: &str, symbol: &str, data_type: DataType, transaction_id: &str) -> ProgressEvent {
        ProgressTracker::api_call(
            EventType::ApiCallStart,
            name,
            symbol,
            Some(data_type.as_str()),
            EventStatus::Running,
            None,
            None,
            None,
            transaction_id,
        )
    }

    fn success_event(&self, name: &str, symbol: &str, data_type: DataType, transaction_id: &str) -> ProgressEvent {
        ProgressTracker::api_call(
            EventType::ApiCallSuccess,
            name,
            symbol,
            Some(data_type.as_str()),
            EventStatus::Success,
            None,
            None,
            None,
            transaction_id,
        )
    }

    fn failed_event(&self, name: &str, symbol: &str, data_type: DataType, transaction_id: &str, error: &SourceError) -> ProgressEvent {
        ProgressTracker::api_call(
            EventType::ApiCallFailed,
            name,
            symbol,
            Some(data_type.as_str()),
            EventStatus::Failed,
            None,
            Some(error.to_string()),
            None,
            transaction_id,
        )
    }

    pub async fn get_stock_price(
        &self,
        symbol: &str,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::StockPrice;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_stock_price(symbol)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }

    pub async fn get_company_info(
        &self,
        symbol: &str,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::CompanyInfo;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_company_info(symbol)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }

    pub async fn get_historical_data(
        &self,
        symbol: &str,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::HistoricalData;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_historical_data(symbol)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }

    pub async fn get_financials(
        &self,
        symbol: &str,
        statement_type: &str,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::FinancialStatements;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_financials(symbol, statement_type)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }

    pub async fn get_news(
        &self,
        symbol: &str,
        n: usize,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::News;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_news(symbol, n)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }

    pub async fn get_technical_indicators(
        &self,
        symbol: &str,
        indicator: &str,
        interval: &str,
        period: usize,
        transaction_id: &str,
        preferred_source: Option<&str>,
    ) -> Result<SourceCallResult, UnifiedError> {
        guardrails::validate_symbol(symbol).map_err(UnifiedError::Guardrails)?;
        let data_type = DataType::TechnicalIndicators;
        let candidates = self.require_candidates(data_type, preferred_source)?;
        let mut events = Vec::new();
        let mut attempted = Vec::new();
        for name in candidates {
            if !self.integration_config.is_enabled(name) {
                events.push(self.skipped_event(name, symbol, data_type, transaction_id));
                continue;
            }
            events.push(self.start_event(name, symbol, data_type, transaction_id));
            attempted.push(name.to_string());
            let client = self.client_by_name(name).expect("candidate source is always resolvable");
            match retry_source_call(|| client.get_technical_indicators(symbol, indicator, interval, period)).await {
                Ok(payload) => {
                    events.push(self.success_event(name, symbol, data_type, transaction_id));
                    return Ok(SourceCallResult { payload, source: name.to_string(), events });
                }
                Err(err) => events.push(self.failed_event(name, symbol, data_type, transaction_id, &err)),
            }
        }
        Err(UnifiedError::AllSourcesFailed(AllSourcesFailed {
            data_type: data_type.as_str().to_string(),
            symbol: symbol.to_string(),
            attempted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_candidates_promotes_preferred_source_to_front() {
        let client = UnifiedDataClient::new("demo", "demo", IntegrationConfig::new());
        let candidates = client.ordered_candidates(DataType::StockPrice, Some("fmp"));
        assert_eq!(candidates.first(), Some(&"fmp"));
    }

    #[test]
    fn ordered_candidates_defaults_to_mapping_order_without_preference() {
        let client = UnifiedDataClient::new("demo", "demo", IntegrationConfig::new());
        let candidates = client.ordered_candidates(DataType::StockPrice, None);
        assert_eq!(candidates, vec!["yahoo_finance", "alpha_vantage", "fmp"]);
    }

    #[tokio::test]
    async fn get_stock_price_rejects_invalid_symbol_before_dispatch() {
        let client = UnifiedDataClient::new("demo", "demo", IntegrationConfig::new());
        let result = client.get_stock_price("THE", "tx", None).await;
        assert!(matches!(result, Err(UnifiedError::Guardrails(_))));
    }

    #[test]
    fn require_candidates_fails_closed_when_no_sources_are_enabled_for_an_unknown_data_type() {
        let client = UnifiedDataClient::new("demo", "demo", IntegrationConfig::new());
        let candidates = client.ordered_candidates(DataType::TechnicalIndicators, None);
        assert_eq!(candidates, vec!["alpha_vantage"]);
    }

    #[test]
    fn ordered_candidates_keeps_disabled_sources_so_the_dispatch_loop_can_skip_them() {
        let config = IntegrationConfig::new().with_base_enabled(crate::integration_config::ALPHA_VANTAGE, false);
        let client = UnifiedDataClient::new("demo", "demo", config);
        // alpha_vantage stays in the list even though it's disabled - pre-filtering it out here
        // is exactly what made `skipped_event` unreachable before.
        let candidates = client.ordered_candidates(DataType::StockPrice, None);
        assert_eq!(candidates, vec!["yahoo_finance", "alpha_vantage", "fmp"]);
    }

    #[test]
    fn require_candidates_fails_closed_when_every_candidate_is_disabled() {
        let config = IntegrationConfig::new()
            .with_base_enabled(crate::integration_config::YAHOO_FINANCE, false)
            .with_base_enabled(crate::integration_config::ALPHA_VANTAGE, false)
            .with_base_enabled(crate::integration_config::FMP, false);
        let client = UnifiedDataClient::new("demo", "demo", config);
        let result = client.require_candidates(DataType::StockPrice, None);
        assert!(matches!(result, Err(UnifiedError::NoSources(_))));
    }

    #[test]
    fn skipped_event_reports_api_call_skipped_status() {
        let client = UnifiedDataClient::new("demo", "demo", IntegrationConfig::new());
        let event = client.skipped_event("alpha_vantage", "AAPL", DataType::StockPrice, "tx");
        assert!(matches!(event.event_type, EventType::ApiCallSkipped));
        assert!(matches!(event.status, EventStatus::Skipped));
    }
}
