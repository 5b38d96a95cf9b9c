//! Alpha Vantage client. Requires an API key; rate limited to 5 calls/minute on the free tier,
//! hence the 12 s minimum inter-call delay. The only source that implements technical
//! indicators.

use super::{classify_reqwest_error, classify_status, RateLimiter, SourceClient};
use crate::finagent::clients::http_pool;
use crate::error::SourceError;
use crate::tracking::{Citation, CitationTracker};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://www.alphavantage.co";
const MIN_INTERVAL: Duration = Duration::from_secs(12);

pub struct AlphaVantageClient {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    api_key: String,
    citations: CitationTracker,
}

impl AlphaVantageClient {
    pub fn new(api_key: &str) -> Self {
        AlphaVantageClient {
            http: http_pool::get_http_client(BASE_URL),
            rate_limiter: RateLimiter::new(MIN_INTERVAL),
            api_key: api_key.to_string(),
            citations: CitationTracker::new(),
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value, SourceError> {
        self.rate_limiter.acquire().await;
        let mut full_params: Vec<(&str, &str)> = params.to_vec();
        full_params.push(("apikey", self.api_key.as_str()));
        let response = self
            .http
            .get(format!("{}/query", BASE_URL))
            .query(&full_params)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        let body: Value = response.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if body.get("Note").is_some() || body.get("Information").is_some() {
            return Err(SourceError::RateLimited);
        }
        if body.get("Error Message").is_some() {
            return Err(SourceError::Empty);
        }
        Ok(body)
    }

    async fn cite(&self, data_point: &str, symbol: &str) {
        self.citations
            .add(Citation {
                source: "alpha_vantage".to_string(),
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
impl SourceClient for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "alpha_vantage"
    }

    fn citations(&self) -> &CitationTracker {
        &self.citations
    }

    async fn get_stock_price(&self, symbol: &str) -> Result<Value, SourceError> {
        let raw = self.query(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol)]).await?;
        let quote = raw.get("Global Quote").ok_or(SourceError::Empty)?;
        let parse_f64 = |key: &str| -> Option<f64> {
            quote.get(key).and_then(Value::as_str).and_then(|s| s.trim_end_matches('%').parse().ok())
        };
        let current_price = parse_f64("05. price").ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "currentPrice": current_price,
            "previousClose": parse_f64("08. previous close"),
            "change": parse_f64("09. change"),
            "changePercent": parse_f64("10. change percent"),
            "volume": parse_f64("06. volume"),
            "dayHigh": parse_f64("03. high"),
            "dayLow": parse_f64("04. low"),
            "open": parse_f64("02. open"),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("stock_price", symbol).await;
        Ok(payload)
    }

    async fn get_technical_indicators(
        &self,
        symbol: &str,
        indicator: &str,
        interval: &str,
        period: usize,
    ) -> Result<Value, SourceError> {
        let period_str = period.to_string();
        let raw = self
            .query(&[
                ("function", indicator),
                ("symbol", symbol),
                ("interval", interval),
                ("time_period", &period_str),
                ("series_type", "close"),
            ])
            .await?;
        let data = raw
            .as_object()
            .and_then(|obj| obj.iter().find(|(key, _)| key.starts_with("Technical Analysis")))
            .map(|(_, value)| value.clone())
            .ok_or(SourceError::Empty)?;
        let payload = serde_json::json!({
            "symbol": symbol,
            "indicator": indicator,
            "interval": interval,
            "timePeriod": period,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.cite("technical_indicators", symbol).await;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_alpha_vantage() {
        let client = AlphaVantageClient::new("demo");
        assert_eq!(client.name(), "alpha_vantage");
    }
}
