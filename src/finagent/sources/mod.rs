//! Finance data source clients and the rate limiting / retry contract they share (§4.5).
//!
//! Three concrete clients ([`yahoo::YahooFinanceClient`], [`alpha_vantage::AlphaVantageClient`],
//! [`fmp::FmpClient`]) each implement a subset of [`SourceClient`]; [`unified::UnifiedDataClient`]
//! is the only thing agents call directly, dispatching across them in the preferred order from
//! [`crate::integration_config`].

pub mod alpha_vantage;
pub mod fmp;
pub mod unified;
pub mod yahoo;

use crate::error::SourceError;
use crate::tracking::CitationTracker;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const MAX_ATTEMPTS: u32 = 3;

/// Minimum inter-call delay enforced per client, shared process-wide across every agent that
/// uses that client (§5).
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter { min_interval, last_call: Mutex::new(None) }
    }

    /// Blocks until at least `min_interval` has elapsed since the previous call returned from
    /// this same method, then reserves the slot for the caller.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Retries `f` up to [`MAX_ATTEMPTS`] total attempts with `2^attempt` second backoff, for
/// retryable [`SourceError`]s only (429/5xx/connection/timeout).
pub async fn retry_source_call<F, Fut, T>(mut f: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                log::warn!("source call attempt {} failed ({}), retrying in {:?}", attempt + 1, err, backoff);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map an HTTP status code to the domain error taxonomy shared by every source client.
///
/// Only the `(500..600)` arm produces `Server`, which is the sole retryable HTTP-status
/// variant (§4.5); every other non-2xx code surfaces immediately as a non-retryable domain
/// error instead of being retried against the same source.
pub fn classify_status(status: reqwest::StatusCode) -> SourceError {
    match status.as_u16() {
        429 => SourceError::RateLimited,
        401 => SourceError::Auth,
        403 => SourceError::Forbidden,
        404 => SourceError::NotFound,
        code if (500..600).contains(&code) => SourceError::Server(code),
        code => SourceError::BadRequest(code),
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if err.is_connect() {
        SourceError::Connection
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        SourceError::Connection
    }
}

/// One of the six finance data types named in §4.4/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    StockPrice,
    CompanyInfo,
    FinancialStatements,
    News,
    HistoricalData,
    TechnicalIndicators,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::StockPrice => "stock_price",
            DataType::CompanyInfo => "company_info",
            DataType::FinancialStatements => "financial_statements",
            DataType::News => "news",
            DataType::HistoricalData => "historical_data",
            DataType::TechnicalIndicators => "technical_indicators",
        }
    }
}

/// Common surface across the three concrete finance clients. A client that does not support a
/// given data type returns `SourceError::NotFound` from the default body rather than a panic, so
/// [`unified::UnifiedDataClient`] can treat "unsupported" and "no data" identically when walking
/// the preferred-source list.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn citations(&self) -> &CitationTracker;

    async fn get_stock_price(&self, _symbol: &str) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn get_company_info(&self, _symbol: &str) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn get_historical_data(&self, _symbol: &str) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn get_financials(&self, _symbol: &str, _statement_type: &str) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn get_news(&self, _symbol: &str, _n: usize) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn get_technical_indicators(
        &self,
        _symbol: &str,
        _indicator: &str,
        _interval: &str,
        _period: usize,
    ) -> Result<Value, SourceError> {
        Err(SourceError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_inter_call_delay() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = StdInstant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn retry_source_call_gives_up_after_three_attempts_on_server_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), SourceError> = retry_source_call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::Server(503)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_source_call_does_not_retry_not_found() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), SourceError> = retry_source_call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::NotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classify_status_matches_retry_semantics_from_error_module() {
        assert_eq!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS), SourceError::RateLimited);
        assert_eq!(classify_status(reqwest::StatusCode::UNAUTHORIZED), SourceError::Auth);
        assert_eq!(classify_status(reqwest::StatusCode::NOT_FOUND), SourceError::NotFound);
        assert!(matches!(classify_status(reqwest::StatusCode::BAD_GATEWAY), SourceError::Server(502)));
        assert_eq!(classify_status(reqwest::StatusCode::BAD_REQUEST), SourceError::BadRequest(400));
        assert!(!SourceError::BadRequest(400).is_retryable());
    }
}
