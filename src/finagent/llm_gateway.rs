//! The one external collaborator every agent calls through: chat completions and embeddings.
//!
//! Spec'd as a two-method contract (§6): `complete` and `embed`. [`OpenAIGateway`] is the
//! concrete implementation, built the way [`crate::clients::http_pool`] builds every other
//! outbound client in this crate - a pooled `reqwest::Client` plus the pinned `openai_rust2`
//! SDK for the chat surface, since that SDK has no embeddings endpoint of its own.

use crate::finagent::clients::http_pool;
use crate::error::LLMError;
use async_trait::async_trait;
use openai_rust2 as openai_rust;
use std::future::Future;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_ATTEMPTS: u32 = 3;
/// Width of the degraded fallback vector handed back when embeddings are unavailable; matches
/// `text-embedding-3-small`'s native dimension so a degraded call is shape-compatible with a
/// real one.
const DEGRADED_EMBEDDING_DIM: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Every agent reaches the LLM only through this trait, so tests can substitute a fake gateway
/// without touching the network.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, LLMError>;

    /// Returns a degraded all-zero vector (logged, not an error) when embeddings are
    /// unavailable after retries, per §6 - callers check `is_degraded_embedding` before relying
    /// on it for similarity search.
    async fn embed(&self, text: &str) -> Vec<f32>;
}

pub fn is_degraded_embedding(embedding: &[f32]) -> bool {
    embedding.iter().all(|v| *v == 0.0)
}

/// Retries `f` up to [`MAX_ATTEMPTS`] total attempts with `2^attempt` second backoff, but only
/// for [`LLMError::is_retryable`] failures.
async fn retry_with_backoff<F, Fut, T>(mut f: F) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                log::warn!(
                    "llm_gateway: attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Classify an `openai_rust2` error string into the `RateLimit`/`Auth`/`BadRequest`/`Other`
/// taxonomy. The SDK does not expose a typed status code on its error variant, so this inspects
/// the rendered message for the HTTP status OpenAI embeds in it - a pragmatic choice recorded in
/// DESIGN.md rather than a load-bearing parser.
fn classify_openai_error(message: &str) -> LLMError {
    if message.contains("429") || message.to_lowercase().contains("rate limit") {
        LLMError::RateLimit
    } else if message.contains("401") || message.contains("403") || message.to_lowercase().contains("invalid api key") {
        LLMError::Auth
    } else if message.contains("400") || message.to_lowercase().contains("invalid request") {
        LLMError::BadRequest(message.to_string())
    } else {
        LLMError::Other(message.to_string())
    }
}

/// Chat completions via the pinned `openai_rust2` SDK, embeddings via a raw `reqwest` call
/// against `/v1/embeddings` since the SDK does not cover that endpoint.
pub struct OpenAIGateway {
    client: openai_rust::Client,
    http: reqwest::Client,
    api_key: String,
    embedding_model: String,
}

impl OpenAIGateway {
    pub fn new(api_key: &str, embedding_model: &str) -> Self {
        let http = http_pool::get_http_client(OPENAI_BASE_URL);
        OpenAIGateway {
            client: openai_rust::Client::new_with_client(api_key, http.clone()),
            http,
            api_key: api_key.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, LLMError> {
        let formatted: Vec<openai_rust::chat::Message> = messages
            .iter()
            .map(|m| openai_rust::chat::Message {
                role: match m.role {
                    ChatRole::System => "system".to_string(),
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let mut args = openai_rust::chat::ChatArguments::new(model, formatted);
        args.temperature = Some(temperature);
        args.max_tokens = Some(max_tokens);

        let response = self
            .client
            .create_chat(args, Some("/v1/chat/completions".to_string()))
            .await
            .map_err(|e| classify_openai_error(&e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Other("empty choices array".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            prompt_tokens: response.usage.prompt_tokens as u64,
            completion_tokens: response.usage.completion_tokens as u64,
            total_tokens: response.usage.total_tokens as u64,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LLMError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });
        let response = self
            .http
            .post(format!("{}/embeddings", OPENAI_BASE_URL))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_openai_error(&e.to_string()))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::Other(format!("invalid embeddings response: {}", e)))?;

        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("embeddings request failed");
            return Err(classify_openai_error(&format!("{} {}", status.as_u16(), message)));
        }

        let embedding = payload
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| LLMError::Other("missing embedding in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        Ok(embedding)
    }
}

#[async_trait]
impl LlmGateway for OpenAIGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, LLMError> {
        retry_with_backoff(|| self.complete_once(messages, model, temperature, max_tokens)).await
    }

    async fn embed(&self, text: &str) -> Vec<f32> {
        match retry_with_backoff(|| self.embed_once(text)).await {
            Ok(embedding) => embedding,
            Err(err) => {
                log::warn!("llm_gateway: embeddings unavailable, degrading to zero vector: {}", err);
                vec![0.0; DEGRADED_EMBEDDING_DIM]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn is_degraded_embedding_detects_all_zero_vectors() {
        assert!(is_degraded_embedding(&[0.0, 0.0, 0.0]));
        assert!(!is_degraded_embedding(&[0.0, 0.1, 0.0]));
    }

    #[test]
    fn classify_openai_error_maps_status_codes() {
        assert_eq!(classify_openai_error("429 Too Many Requests"), LLMError::RateLimit);
        assert_eq!(classify_openai_error("401 Unauthorized"), LLMError::Auth);
        assert!(matches!(classify_openai_error("400 Bad Request"), LLMError::BadRequest(_)));
        assert!(matches!(classify_openai_error("503 Service Unavailable"), LLMError::Other(_)));
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_after_three_attempts_on_persistent_rate_limit() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), LLMError> = retry_with_backoff(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LLMError::RateLimit) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_with_backoff_does_not_retry_auth_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), LLMError> = retry_with_backoff(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LLMError::Auth) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_with_backoff_returns_first_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(LLMError::Other("transient".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
    }
}
