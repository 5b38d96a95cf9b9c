//! Yahoo Finance client. No API key required; fastest, so it leads the preferred order for
//! every data type it supports.

use super::{classify_reqwest_error, classify_status, RateLimiter, SourceClient};
use crate::finagent::clients::http_pool;
use crate::error::SourceError;
use crate::tracking::{Citation, CitationTracker};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct YahooFinanceClient {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    citations: CitationTracker,
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        YahooFinanceClient {
            http: http_pool::get_http_client(BASE_URL),
            rate_limiter: RateLimiter::new(MIN_INTERVAL),
            citations: CitationTracker::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, SourceError> {
        self.rate_limiter.acquire().await;
        let response = self
            .http
            .get(format!("{}{}", BASE_URL, path))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| classify_reqwest_error(&e))
    }

    async fn cite(&self, data_point: &str, symbol: &str) {
        self.citations
            .add(Citation {
                source: "yahoo_finance".to_string(),
                url: None,
                date: Utc::now(),
                agent: None,
                data_point: Some(data_point.to_string()),
                symbol: Some(symbol.to_string()),
            })
            .await;
    }
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceClient for YahooFinanceClient {
    fn name(&self) -> &'static str {
        "yahoo_finance"
    }

    fn citations(&self) -> &CitationTracker {
        &self.citations
    }

    async fn get_stock_price(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self.get(&format!("/v8/finance/chart/{}", symbol)).await?;
        let meta = raw
            .pointer("/chart/result/0/meta")
            .ok_or(SourceError::Empty)?;
        let current_price = meta.get("regularMarketPrice").and_then(Value::as_f64).ok_or(SourceError::Empty)?;
        let previous_close = meta.get("chartPreviousClose").or_else(|| meta.get("previousClose")).and_then(Value::as_f64);
        let change = previous_close.map(|prev| current_price - prev);
        let change_percent = match (change, previous_close) {
            (Some(c), Some(prev)) if prev != 0.0 => Some(c / prev * 100.0),
            _ => None,
        };
        let mut payload = serde_json::json!({
            "symbol": symbol,
            "currentPrice": current_price,
            "volume": meta.get("regularMarketVolume"),
            "dayHigh": meta.get("regularMarketDayHigh"),
            "dayLow": meta.get("regularMarketDayLow"),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(prev) = previous_close {
            payload["previousClose"] = serde_json::json!(prev);
        }
        if let Some(change) = change {
            payload["change"] = serde_json::json!(change);
        }
        if let Some(change_percent) = change_percent {
            payload["changePercent"] = serde_json::json!(change_percent);
        }
        if let Some(cap) = meta.get("marketCap") {
            payload["marketCap"] = cap.clone();
        }
        if let Some(high) = meta.get("fiftyTwoWeekHigh") {
            payload["fiftyTwoWeekHigh"] = high.clone();
        }
        if let Some(low) = meta.get("fiftyTwoWeekLow") {
            payload["fiftyTwoWeekLow"] = low.clone();
        }
        self.cite("stock_price", symbol).await;
        Ok(payload)
    }

    async fn get_company_info(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self
            .get(&format!(
                "/v10/finance/quoteSummary/{}?modules=assetProfile",
                symbol
            ))
            .await?;
        let profile = raw
            .pointer("/quoteSummary/result/0/assetProfile")
            .ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "name": profile.get("longName").or_else(|| profile.get("name")),
            "sector": profile.get("sector"),
            "industry": profile.get("industry"),
            "description": profile.get("longBusinessSummary"),
            "employees": profile.get("fullTimeEmployees"),
            "website": profile.get("website"),
            "address": profile.get("address1"),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("company_info", symbol).await;
        Ok(payload)
    }

    async fn get_historical_data(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self
            .get(&format!(
                "/v8/finance/chart/{}?range=3mo&interval=1d",
                symbol
            ))
            .await?;
        let result = raw.pointer("/chart/result/0").ok_or(SourceError::Empty)?;
        let timestamps = result.get("timestamp").cloned().unwrap_or(Value::Array(vec![]));
        let quote = result.pointer("/indicators/quote/0").cloned().unwrap_or(Value::Null);
        let payload = serde_json::json!({
            "symbol": symbol,
            "period": "3mo",
            "data": quote,
            "dates": timestamps,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("historical_data", symbol).await;
        Ok(payload)
    }

    async fn get_financials(&self, symbol: &str, statement_type: &str) -> Result<Value, SourceError> {
        let module = match statement_type {
            "balance_sheet" => "balanceSheetHistory",
            "cash_flow" => "cashflowStatementHistory",
            _ => "incomeStatementHistory",
        };
        let raw = self
            .get(&format!("/v10/finance/quoteSummary/{}?modules={}", symbol, module))
            .await?;
        let data = raw
            .pointer(&format!("/quoteSummary/result/0/{}", module))
            .ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "statementType": statement_type,
            "data": data,
            "count": data.as_array().map(Vec::len).unwrap_or(0),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("financial_statements", symbol).await;
        Ok(payload)
    }

    async fn get_news(&self, symbol: &str, n: usize) -> Result<Value, SourceError> {
        let raw = self
            .get(&format!("/v1/finance/search?q={}&newsCount={}", symbol, n))
            .await?;
        let articles: Vec<Value> = raw
            .get("news")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(n)
            .map(|item| {
                serde_json::json!({
                    "title": item.get("title"),
                    "summary": item.get("summary"),
                    "link": item.get("link"),
                    "publisher": item.get("publisher"),
                    "publishedDate": item.get("providerPublishTime"),
                })
            })
            .collect();
        if articles.is_empty() {
            return Err(SourceError::Empty);
        }
        let payload = serde_json::json!({
            "symbol": symbol,
            "articles": articles,
            "count": articles.len(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("news", symbol).await;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_yahoo_finance() {
        let client = YahooFinanceClient::new();
        assert_eq!(client.name(), "yahoo_finance");
    }
}
