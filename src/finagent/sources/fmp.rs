//! Financial Modeling Prep client. Requires an API key; leads the preferred order for
//! `financial_statements` since it offers the most complete statement coverage of the three.

use super::{classify_reqwest_error, classify_status, RateLimiter, SourceClient};
use crate::finagent::clients::http_pool;
use crate::error::SourceError;
use crate::tracking::{Citation, CitationTracker};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://financialmodelingprep.com";
const MIN_INTERVAL: Duration = Duration::from_millis(500);

pub struct FmpClient {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    api_key: String,
    citations: CitationTracker,
}

impl FmpClient {
    pub fn new(api_key: &str) -> Self {
        FmpClient {
            http: http_pool::get_http_client(BASE_URL),
            rate_limiter: RateLimiter::new(MIN_INTERVAL),
            api_key: api_key.to_string(),
            citations: CitationTracker::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, SourceError> {
        self.rate_limiter.acquire().await;
        let url = format!("{}{}{}apikey={}", BASE_URL, path, if path.contains('?') { "&" } else { "?" }, self.api_key);
        let response = self.http.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response.json::<Value>().await.map_err(|e| classify_reqwest_error(&e))
    }

    async fn cite(&self, data_point: &str, symbol: &str) {
        self.citations
            .add(Citation {
                source: "fmp".to_string(),
                url: None,
                date: Utc::now(),
                agent: None,
                data_point: Some(data_point.to_string()),
                symbol: Some(symbol.to_string()),
            })
            .await;
    }
}

#[async_trait]
impl SourceClient for FmpClient {
    fn name(&self) -> &'static str {
        "fmp"
    }

    fn citations(&self) -> &CitationTracker {
        &self.citations
    }

    async fn get_stock_price(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self.get(&format!("/api/v3/quote/{}", symbol)).await?;
        let quote = raw.as_array().and_then(|a| a.first()).ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "currentPrice": quote.get("price"),
            "previousClose": quote.get("previousClose"),
            "change": quote.get("change"),
            "changePercent": quote.get("changesPercentage"),
            "volume": quote.get("volume"),
            "dayHigh": quote.get("dayHigh"),
            "dayLow": quote.get("dayLow"),
            "open": quote.get("open"),
            "marketCap": quote.get("marketCap"),
            "fiftyTwoWeekHigh": quote.get("yearHigh"),
            "fiftyTwoWeekLow": quote.get("yearLow"),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("stock_price", symbol).await;
        Ok(payload)
    }

    async fn get_company_info(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self.get(&format!("/api/v3/profile/{}", symbol)).await?;
        let profile = raw.as_array().and_then(|a| a.first()).ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "name": profile.get("companyName"),
            "sector": profile.get("sector"),
            "industry": profile.get("industry"),
            "description": profile.get("description"),
            "employees": profile.get("fullTimeEmployees"),
            "website": profile.get("website"),
            "address": profile.get("address"),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("company_info", symbol).await;
        Ok(payload)
    }

    async fn get_financials(&self, symbol: &str, statement_type: &str) -> Result<Value, SourceError> {
        let endpoint = match statement_type {
            "balance_sheet" => "balance-sheet-statement",
            "cash_flow" => "cash-flow-statement",
            _ => "income-statement",
        };
        let raw = self
            .get(&format!("/api/v3/{}/{}?limit=4", endpoint, symbol))
            .await?;
        let data = raw.as_array().cloned().unwrap_or_default();
        if data.is_empty() {
            return Err(SourceError::Empty);
        }
        let payload = serde_json::json!({
            "symbol": symbol,
            "statementType": statement_type,
            "count": data.len(),
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("financial_statements", symbol).await;
        Ok(payload)
    }

    async fn get_news(&self, symbol: &str, n: usize) -> Result<Value, SourceError> {
        let raw = self
            .get(&format!("/api/v3/stock_news?tickers={}&limit={}", symbol, n))
            .await?;
        let articles: Vec<Value> = raw
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(n)
            .map(|item| {
                serde_json::json!({
                    "title": item.get("title"),
                    "text": item.get("text"),
                    "url": item.get("url"),
                    "site": item.get("site"),
                    "publishedDate": item.get("publishedDate"),
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
    fn name_is_fmp() {
        let client = FmpClient::new("demo");
        assert_eq!(client.name(), "fmp");
    }
}
