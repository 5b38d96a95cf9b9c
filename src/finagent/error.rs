//! Error taxonomy for the finance orchestration core.
//!
//! Every fallible boundary in the crate resolves to one of the kinds defined here rather than
//! to an opaque `Box<dyn Error>`. Callers match on the kind to decide whether to retry, fall
//! back to the next data source, or degrade a section of the final report to a placeholder.
//! None of these errors abort the workflow on their own — the orchestrator decides that, per
//! the propagation policy documented on each enum.

use std::error::Error;
use std::fmt;

/// Errors raised by [`crate::guardrails`].
///
/// Recovered at the workflow boundary: the caller receives a human-readable remediation hint
/// and no agent executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailsError {
    /// The query matched one of the dangerous-pattern regexes (script injection, SQL, shell
    /// eval tokens, ...).
    Unsafe(String),
    /// The query matched an out-of-scope keyword (crypto, gambling, medical, security exploits).
    OutOfScope(String),
    /// The query contains neither a financial keyword nor a valid symbol.
    NotFinancial,
    /// A symbol failed [`crate::guardrails::validate_symbol`].
    InvalidSymbol(String),
    /// [`crate::guardrails::validate_state`] found the shared context missing a required field.
    StateInvalid(String),
}

impl fmt::Display for GuardrailsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardrailsError::Unsafe(pattern) => {
                write!(f, "query rejected: matched unsafe pattern ({})", pattern)
            }
            GuardrailsError::OutOfScope(keyword) => write!(
                f,
                "query rejected: out of scope for financial research ({})",
                keyword
            ),
            GuardrailsError::NotFinancial => write!(
                f,
                "query rejected: no financial keyword or stock symbol found"
            ),
            GuardrailsError::InvalidSymbol(symbol) => {
                write!(f, "invalid symbol: {}", symbol)
            }
            GuardrailsError::StateInvalid(field) => {
                write!(f, "shared context invalid: missing or malformed {}", field)
            }
        }
    }
}

impl Error for GuardrailsError {}

/// Errors raised by a single [`crate::sources`] client call.
///
/// Recovered locally inside [`crate::sources::unified::UnifiedDataClient`] by trying the next
/// source in the preferred order; never propagated verbatim past that boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    RateLimited,
    Auth,
    Forbidden,
    NotFound,
    /// Any other non-5xx client error (400 and unlisted 4xx codes) - a domain error, never
    /// worth retrying against the same source.
    BadRequest(u16),
    Timeout,
    Connection,
    Server(u16),
    /// The source responded successfully but with no usable data.
    Empty,
}

impl SourceError {
    /// Whether a retry (same source, next attempt) is worthwhile for this error.
    ///
    /// Mirrors §4.5: retry on 429/5xx/connection/timeout, never on 400/401/403/404.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimited
                | SourceError::Server(_)
                | SourceError::Timeout
                | SourceError::Connection
        )
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::RateLimited => write!(f, "rate limited (429)"),
            SourceError::Auth => write!(f, "authentication failed (401)"),
            SourceError::Forbidden => write!(f, "forbidden (403)"),
            SourceError::NotFound => write!(f, "not found (404)"),
            SourceError::BadRequest(code) => write!(f, "client error ({})", code),
            SourceError::Timeout => write!(f, "request timed out"),
            SourceError::Connection => write!(f, "connection error"),
            SourceError::Server(code) => write!(f, "server error ({})", code),
            SourceError::Empty => write!(f, "empty response"),
        }
    }
}

impl Error for SourceError {}

/// No enabled source exists for the requested data type.
///
/// Surfaced per call; the caller may continue if the data type is optional for the current
/// query type (e.g. `historical_data` is only required for `trend`/`comparison` queries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoSources {
    pub data_type: String,
}

impl fmt::Display for NoSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no enabled integrations for data type \"{}\"",
            self.data_type
        )
    }
}

impl Error for NoSources {}

/// Every candidate source for a call failed or was disabled.
///
/// Non-fatal at the per-symbol level: it demotes the symbol to `failed` and the agent moves on.
/// Only surfaces as a hard stop when it is the only symbol in the query and the data type was
/// required, in which case the Reporting agent notes the gap rather than the workflow aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllSourcesFailed {
    pub data_type: String,
    pub symbol: String,
    pub attempted: Vec<String>,
}

impl fmt::Display for AllSourcesFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all sources failed for {} {} (tried: {})",
            self.symbol,
            self.data_type,
            self.attempted.join(", ")
        )
    }
}

impl Error for AllSourcesFailed {}

/// Errors raised by [`crate::llm_gateway::LlmGateway`].
///
/// `Auth`/`BadRequest` are non-retryable; `RateLimit`/`Other` retry up to 3 times with
/// exponential backoff. A final failure downgrades the relevant analysis section to a
/// placeholder message rather than aborting the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMError {
    RateLimit,
    Auth,
    BadRequest(String),
    Other(String),
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LLMError::RateLimit => write!(f, "LLM gateway rate limited"),
            LLMError::Auth => write!(f, "LLM gateway authentication failed"),
            LLMError::BadRequest(msg) => write!(f, "LLM gateway rejected request: {}", msg),
            LLMError::Other(msg) => write!(f, "LLM gateway error: {}", msg),
        }
    }
}

impl Error for LLMError {}

impl LLMError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LLMError::RateLimit | LLMError::Other(_))
    }
}

/// Errors raised by [`crate::vector_store::VectorStore`].
///
/// `DimensionMismatch` triggers the recreate-or-probe recovery described in §6; `Other` is
/// logged and swallowed for auxiliary writes (news/report insertion) but propagated for lookups
/// the Analyst agent relies on for similarity search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorStoreError {
    DimensionMismatch { expected: usize, got: usize },
    Other(String),
}

impl fmt::Display for VectorStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorStoreError::DimensionMismatch { expected, got } => write!(
                f,
                "embedding dimension mismatch: collection expects {}, got {}",
                expected, got
            ),
            VectorStoreError::Other(msg) => write!(f, "vector store error: {}", msg),
        }
    }
}

impl Error for VectorStoreError {}

/// Top-level error returned from [`crate::orchestrator::Orchestrator::run`].
///
/// Unlike the per-component kinds above, this is the only error variant that actually aborts
/// the workflow before a final report is produced.
#[derive(Debug, Clone)]
pub enum WorkflowError {
    Guardrails(GuardrailsError),
    NoSources(NoSources),
    /// Post-execution state validation failed. Logged as a warning, not raised, per §7 -
    /// kept here only so tests can assert on it explicitly.
    StateInvalid(String),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Guardrails(e) => write!(f, "{}", e),
            WorkflowError::NoSources(e) => write!(f, "{}", e),
            WorkflowError::StateInvalid(msg) => write!(f, "state invalid: {}", msg),
        }
    }
}

impl Error for WorkflowError {}

impl From<GuardrailsError> for WorkflowError {
    fn from(e: GuardrailsError) -> Self {
        WorkflowError::Guardrails(e)
    }
}

impl From<NoSources> for WorkflowError {
    fn from(e: NoSources) -> Self {
        WorkflowError::NoSources(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_retry_classification_matches_http_semantics() {
        assert!(SourceError::RateLimited.is_retryable());
        assert!(SourceError::Server(503).is_retryable());
        assert!(SourceError::Timeout.is_retryable());
        assert!(SourceError::Connection.is_retryable());
        assert!(!SourceError::Auth.is_retryable());
        assert!(!SourceError::Forbidden.is_retryable());
        assert!(!SourceError::NotFound.is_retryable());
        assert!(!SourceError::BadRequest(400).is_retryable());
        assert!(!SourceError::Empty.is_retryable());
    }

    #[test]
    fn llm_error_retry_classification() {
        assert!(LLMError::RateLimit.is_retryable());
        assert!(LLMError::Other("timeout".into()).is_retryable());
        assert!(!LLMError::Auth.is_retryable());
        assert!(!LLMError::BadRequest("bad schema".into()).is_retryable());
    }

    #[test]
    fn guardrails_error_display_includes_remediation_context() {
        let err = GuardrailsError::OutOfScope("crypto".into());
        assert!(err.to_string().contains("out of scope"));
    }
}
