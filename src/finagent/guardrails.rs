//! Stateless input validation, symbol extraction, and output sanitization.
//!
//! Every validator here returns a `Result<(), GuardrailsError>` rather than mutating anything;
//! callers decide whether a failure aborts the workflow (query validation, at the entry point)
//! or just gets logged (agent output validation, which warns rather than failing for everything
//! except the dangerous-pattern and length checks, per §4.3).

use crate::error::GuardrailsError;
use crate::state::QueryType;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

pub const MAX_QUERY_LENGTH: usize = 2000;
pub const MAX_SYMBOLS_PER_QUERY: usize = 20;
pub const MAX_AGENT_OUTPUT_LENGTH: usize = 50_000;

lazy_static! {
    /// Keywords that indicate a query is about financial markets at all.
    pub static ref FINANCIAL_KEYWORDS: HashSet<&'static str> = [
        "stock", "stocks", "equity", "equities", "share", "shares",
        "company", "companies", "corporation", "corp", "inc", "ltd",
        "price", "prices", "trading", "trade", "market", "markets",
        "financial", "finance", "revenue", "profit", "earnings", "eps",
        "pe", "p/e", "ratio", "ratios", "valuation", "value",
        "dividend", "dividends", "yield", "growth", "analysis", "analyze",
        "compare", "comparison", "trend", "trends", "sentiment", "news",
        "balance sheet", "income statement", "cash flow", "financials",
        "market cap", "market capitalization", "volume", "volatility",
        "beta", "alpha", "rsi", "macd", "technical", "fundamental",
        "investment", "invest", "portfolio", "asset", "assets", "liability",
        "recommendation", "recommend", "buy", "sell", "hold", "rating",
        "analyst", "analysts", "forecast", "outlook", "sector", "industry",
    ].into_iter().collect();

    /// Keywords that put a query out of scope even if it also matches a financial keyword
    /// (e.g. crypto is financial but explicitly excluded by this system).
    pub static ref NON_FINANCIAL_KEYWORDS: HashSet<&'static str> = [
        "hack", "hacking", "exploit", "exploits", "vulnerability", "vulnerabilities",
        "password", "credentials", "login", "authentication", "authorization",
        "sql injection", "xss", "cross-site", "script", "malware", "virus",
        "crypto", "cryptocurrency", "bitcoin", "ethereum", "blockchain",
        "gambling", "casino", "betting", "lottery",
        "illegal", "unlawful", "criminal", "fraud", "scam", "ponzi",
        "personal information", "pii", "ssn", "social security",
        "medical", "health", "prescription", "drug", "pharmaceutical",
    ].into_iter().collect();

    /// Common English words that match the symbol regex but are never real tickers.
    pub static ref INVALID_SYMBOLS: HashSet<&'static str> = [
        "THE", "AND", "OR", "FOR", "WITH", "FROM", "THIS", "THAT", "WHAT",
        "WHEN", "WHERE", "WHY", "HOW", "WHO", "WHICH", "WILL", "WOULD",
        "SHOULD", "COULD", "MIGHT", "MAY", "CAN", "MUST", "SHALL",
        "ABOUT", "ABOVE", "ACROSS", "AFTER", "AGAIN", "AGAINST", "ALONG",
        "AMONG", "AROUND", "BEFORE", "BEHIND", "BELOW", "BENEATH", "BESIDE",
        "BETWEEN", "BEYOND", "DURING", "EXCEPT", "INSIDE", "OUTSIDE",
        "THROUGH", "THROUGHOUT", "TOWARD", "UNDER", "UNDERNEATH", "UNTIL",
        "UPON", "WITHIN", "WITHOUT", "YOUR", "YOURS", "YOU", "YOURSELF",
    ].into_iter().collect();

    /// Data sources the rest of the pipeline is allowed to cite as an attribution source.
    pub static ref ALLOWED_DATA_SOURCES: HashSet<&'static str> = [
        "yahoo_finance", "alpha_vantage", "financial_modeling_prep", "fmp",
    ].into_iter().collect();

    /// Vocabulary the Reporting agent's output is expected to contain.
    pub static ref FINANCIAL_OUTPUT_KEYWORDS: HashSet<&'static str> = [
        "stock", "price", "financial", "analysis", "company", "revenue",
        "earnings", "ratio", "valuation", "market", "investment", "recommendation",
    ].into_iter().collect();

    static ref VALID_SYMBOL_PATTERN: Regex = Regex::new(r"^[A-Z]{1,5}(?:\.[A-Z]{1,2})?$").unwrap();
    static ref SYMBOL_SCAN_PATTERN: Regex = Regex::new(r"\b([A-Z]{1,5})(?:\.[A-Z]{1,2})?\b").unwrap();

    /// Case-insensitive regexes that signal an unsafe, injection-style query (§6).
    static ref DANGEROUS_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap(),
        Regex::new(r"(?i)javascript:").unwrap(),
        Regex::new(r"(?i)on\w+\s*=").unwrap(),
        Regex::new(r"(?i)data:text/html").unwrap(),
        Regex::new(r"(?i)vbscript:").unwrap(),
        Regex::new(r"(?i)<iframe[^>]*>").unwrap(),
        Regex::new(r"(?i)<object[^>]*>").unwrap(),
        Regex::new(r"(?i)<embed[^>]*>").unwrap(),
        Regex::new(r"(?i)expression\s*\(").unwrap(),
        Regex::new(r"(?i)@import").unwrap(),
        Regex::new(r"(?i)\\x[0-9a-f]{2}").unwrap(),
        Regex::new(r"(?i)%[0-9a-f]{2}").unwrap(),
        Regex::new(r"(?i)union\s+select").unwrap(),
        Regex::new(r"(?i);\s*drop\s+table").unwrap(),
        Regex::new(r"(?i)exec\s*\(").unwrap(),
        Regex::new(r"(?i)eval\s*\(").unwrap(),
        Regex::new(r"(?i)system\s*\(").unwrap(),
        Regex::new(r"(?i)shell_exec").unwrap(),
        Regex::new(r"(?i)passthru").unwrap(),
        Regex::new(r"(?i)proc_open").unwrap(),
        Regex::new(r"(?i)file_get_contents\s*\(").unwrap(),
        Regex::new(r"(?i)file_put_contents\s*\(").unwrap(),
        Regex::new(r"(?i)fopen\s*\(").unwrap(),
        Regex::new(r"(?i)fwrite\s*\(").unwrap(),
        Regex::new(r"(?i)include\s*\(").unwrap(),
        Regex::new(r"(?i)require\s*\(").unwrap(),
        Regex::new(r"(?i)curl_exec").unwrap(),
        Regex::new(r"(?i)fsockopen").unwrap(),
    ];
}

fn first_dangerous_match(text: &str) -> Option<&'static str> {
    DANGEROUS_PATTERNS
        .iter()
        .find(|pattern| pattern.is_match(text))
        .map(|pattern| pattern.as_str())
}

/// Result of [`check_query_intent`].
#[derive(Debug, Clone)]
pub struct QueryIntent {
    pub is_financial: bool,
    pub has_symbols: bool,
    pub query_type: QueryType,
    pub symbols: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Strip NUL and control characters other than `\n`/`\t`. Raises [`GuardrailsError::Unsafe`]
/// if a dangerous pattern is present rather than attempting to strip it out.
pub fn sanitize_input(input: &str) -> Result<String, GuardrailsError> {
    if let Some(pattern) = first_dangerous_match(input) {
        return Err(GuardrailsError::Unsafe(pattern.to_string()));
    }
    let sanitized: String = input
        .chars()
        .filter(|&c| c as u32 >= 32 || c == '\n' || c == '\t')
        .filter(|&c| c != '\0')
        .collect();
    Ok(sanitized)
}

/// `^[A-Z]{1,5}(\.[A-Z]{1,2})?$`, base token not a stopword, total length 1-7.
pub fn validate_symbol(symbol: &str) -> Result<(), GuardrailsError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || symbol.len() > 7 {
        return Err(GuardrailsError::InvalidSymbol(symbol));
    }
    if !VALID_SYMBOL_PATTERN.is_match(&symbol) {
        return Err(GuardrailsError::InvalidSymbol(symbol));
    }
    let base_symbol = symbol.split('.').next().unwrap_or(&symbol);
    if INVALID_SYMBOLS.contains(base_symbol) {
        return Err(GuardrailsError::InvalidSymbol(symbol));
    }
    Ok(())
}

/// Scan for `\b[A-Z]{1,5}(\.[A-Z]{1,2})?\b`, validate each match, dedup preserving order,
/// cap at [`MAX_SYMBOLS_PER_QUERY`].
pub fn extract_symbols(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for capture in SYMBOL_SCAN_PATTERN.find_iter(text) {
        let candidate = capture.as_str().to_uppercase();
        if validate_symbol(&candidate).is_ok() && seen.insert(candidate.clone()) {
            symbols.push(candidate);
        }
        if symbols.len() >= MAX_SYMBOLS_PER_QUERY {
            break;
        }
    }
    symbols
}

/// Non-empty, ≤ [`MAX_QUERY_LENGTH`], no dangerous pattern, no out-of-scope keyword, and at
/// least one financial keyword or valid symbol.
pub fn validate_query(text: &str) -> Result<(), GuardrailsError> {
    if text.trim().is_empty() {
        return Err(GuardrailsError::NotFinancial);
    }
    if text.len() > MAX_QUERY_LENGTH {
        return Err(GuardrailsError::Unsafe(format!(
            "query exceeds {} characters",
            MAX_QUERY_LENGTH
        )));
    }
    sanitize_input(text)?;

    let lower = text.to_lowercase();
    for keyword in NON_FINANCIAL_KEYWORDS.iter() {
        if lower.contains(keyword) {
            return Err(GuardrailsError::OutOfScope((*keyword).to_string()));
        }
    }

    let has_financial_keyword = FINANCIAL_KEYWORDS.iter().any(|kw| lower.contains(kw));
    let has_symbols = !extract_symbols(text).is_empty();
    if !has_financial_keyword && !has_symbols {
        return Err(GuardrailsError::NotFinancial);
    }
    Ok(())
}

/// ≤ [`MAX_AGENT_OUTPUT_LENGTH`], no dangerous patterns; the reporting agent additionally must
/// contain financial vocabulary and must not contain out-of-scope content.
pub fn validate_agent_output(text: &str, agent_name: &str) -> Result<(), GuardrailsError> {
    if text.is_empty() {
        return Err(GuardrailsError::StateInvalid(format!(
            "{}: output must be non-empty",
            agent_name
        )));
    }
    if text.len() > MAX_AGENT_OUTPUT_LENGTH {
        return Err(GuardrailsError::Unsafe(format!(
            "{}: output exceeds {} characters",
            agent_name, MAX_AGENT_OUTPUT_LENGTH
        )));
    }
    sanitize_input(text)?;

    if agent_name.eq_ignore_ascii_case("reporting") {
        let lower = text.to_lowercase();
        let has_non_financial = NON_FINANCIAL_KEYWORDS.iter().any(|kw| lower.contains(kw));
        if has_non_financial {
            return Err(GuardrailsError::OutOfScope(format!(
                "{}: output contains out-of-scope content",
                agent_name
            )));
        }
        let has_financial_content = FINANCIAL_OUTPUT_KEYWORDS.iter().any(|kw| lower.contains(kw));
        if !has_financial_content && text.len() > 100 {
            log::warn!("{}: output may not be financial domain-related", agent_name);
        }
    }
    Ok(())
}

/// Required fields present on the shared context; symbols and the final report (if any) pass
/// their individual validators.
pub fn validate_state(
    query: &str,
    symbols: &[String],
    final_report: Option<&str>,
) -> Result<(), GuardrailsError> {
    validate_query(query)?;
    for symbol in symbols {
        validate_symbol(symbol)?;
    }
    if symbols.len() > MAX_SYMBOLS_PER_QUERY {
        return Err(GuardrailsError::StateInvalid("too many symbols".to_string()));
    }
    if let Some(report) = final_report {
        if !report.is_empty() {
            validate_agent_output(report, "Reporting")?;
        }
    }
    Ok(())
}

/// Keyword scan that derives a [`QueryType`] from free text (§9's query-type table).
/// First match wins: comparison, then trend, then sentiment, then similarity, else
/// `single_stock`.
pub fn detect_query_type(text: &str) -> QueryType {
    let lower = text.to_lowercase();
    if ["compare", "comparison", "vs", "versus"]
        .iter()
        .any(|w| lower.contains(w))
    {
        QueryType::Comparison
    } else if ["trend", "trends", "pattern", "patterns"]
        .iter()
        .any(|w| lower.contains(w))
    {
        QueryType::Trend
    } else if ["sentiment", "news", "impact"].iter().any(|w| lower.contains(w)) {
        QueryType::Sentiment
    } else if ["similar", "like", "same as"].iter().any(|w| lower.contains(w)) {
        QueryType::Similarity
    } else {
        QueryType::SingleStock
    }
}

/// Risk escalates on out-of-scope hits, long queries, or more than 10 symbols.
pub fn check_query_intent(text: &str) -> QueryIntent {
    let lower = text.to_lowercase();
    let is_financial = FINANCIAL_KEYWORDS.iter().any(|kw| lower.contains(kw));
    let symbols = extract_symbols(text);
    let has_symbols = !symbols.is_empty();
    let query_type = detect_query_type(text);

    let risk_level = if NON_FINANCIAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        RiskLevel::High
    } else if text.len() > 1000 || symbols.len() > 10 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    QueryIntent {
        is_financial,
        has_symbols,
        query_type,
        symbols,
        risk_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_query_accepts_plain_financial_query() {
        assert!(validate_query("Analyze Apple Inc. (AAPL) stock").is_ok());
    }

    #[test]
    fn validate_query_rejects_out_of_scope_keyword() {
        let err = validate_query("hack the database").unwrap_err();
        assert!(matches!(err, GuardrailsError::OutOfScope(_)));
    }

    #[test]
    fn validate_query_rejects_non_financial_text() {
        let err = validate_query("what is the weather today").unwrap_err();
        assert_eq!(err, GuardrailsError::NotFinancial);
    }

    #[test]
    fn validate_query_rejects_dangerous_pattern() {
        let err = validate_query("<script>alert(1)</script> AAPL").unwrap_err();
        assert!(matches!(err, GuardrailsError::Unsafe(_)));
    }

    #[test]
    fn validate_query_rejects_over_length() {
        let long_query = "analyze stock ".repeat(200);
        assert!(long_query.len() > MAX_QUERY_LENGTH);
        let err = validate_query(&long_query).unwrap_err();
        assert!(matches!(err, GuardrailsError::Unsafe(_)));
    }

    #[test]
    fn validate_symbol_accepts_common_tickers() {
        assert!(validate_symbol("AAPL").is_ok());
        assert!(validate_symbol("BRK.A").is_ok());
    }

    #[test]
    fn validate_symbol_rejects_stopwords() {
        assert!(validate_symbol("THE").is_err());
        assert!(validate_symbol("WITH").is_err());
    }

    #[test]
    fn extract_symbols_dedups_preserving_order_and_caps_at_twenty() {
        let symbols = extract_symbols("Compare AAPL, MSFT, AAPL, and GOOGL");
        assert_eq!(symbols, vec!["AAPL", "MSFT", "GOOGL"]);
    }

    #[test]
    fn extract_symbols_excludes_common_words_that_look_like_tickers() {
        let symbols = extract_symbols("WHAT IS THE price of AAPL");
        assert_eq!(symbols, vec!["AAPL"]);
    }

    #[test]
    fn detect_query_type_matches_keyword_table_in_priority_order() {
        assert_eq!(detect_query_type("Compare AAPL and MSFT"), QueryType::Comparison);
        assert_eq!(detect_query_type("AAPL price trend"), QueryType::Trend);
        assert_eq!(detect_query_type("AAPL news sentiment"), QueryType::Sentiment);
        assert_eq!(detect_query_type("something similar to AAPL"), QueryType::Similarity);
        assert_eq!(detect_query_type("Analyze AAPL stock"), QueryType::SingleStock);
    }

    #[test]
    fn check_query_intent_escalates_risk_on_many_symbols() {
        let query = "Compare AAPL MSFT GOOGL AMZN NVDA META TSLA NFLX AMD INTC IBM JPM";
        let intent = check_query_intent(query);
        assert_eq!(intent.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn check_query_intent_flags_high_risk_for_out_of_scope_keyword() {
        let intent = check_query_intent("bitcoin price analysis");
        assert_eq!(intent.risk_level, RiskLevel::High);
    }

    #[test]
    fn validate_agent_output_requires_financial_vocabulary_for_reporting_agent() {
        assert!(validate_agent_output("Stock price analysis shows strong earnings.", "Reporting").is_ok());
    }

    #[test]
    fn validate_agent_output_rejects_out_of_scope_content_for_reporting_agent() {
        let err = validate_agent_output(
            "Here is how to exploit a vulnerability in the login form.",
            "Reporting",
        )
        .unwrap_err();
        assert!(matches!(err, GuardrailsError::OutOfScope(_)));
    }
}
