//! ============================================================================
//! Embedding Service - Text embeddings for semantic search
//! ============================================================================
//! Generates embeddings through an OpenAI-compatible API. Every HTTP call
//! runs inside the service's own circuit breaker and deadline, so a failing
//! embeddings backend degrades personalization instead of cascading.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::resilience::{with_timeout, CircuitBreaker, AI_TIMEOUT};
use crate::vector::cosine_similarity;

/// Default embedding model (OpenAI compatible).
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Expected embedding dimension for text-embedding-3-small.
pub const EMBEDDING_DIM: usize = 1536;

/// Provider-side input limit, enforced by truncation before the call.
const MAX_INPUT_CHARS: usize = 8000;

/// Trait seam over the embeddings backend. Stores depend on this so they can
/// be exercised without network access.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Empty input is a validation error.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;

    /// Embed several texts in one call, preserving input order. Blank texts
    /// are dropped before the call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}

/// Embedding service backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingService {
    /// Create a service against the OpenAI API.
    pub fn new(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            "https://api.openai.com/v1".to_string(),
            DEFAULT_EMBEDDING_MODEL.to_string(),
        )
    }

    /// Create with a custom base URL and model.
    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
            breaker: Arc::new(CircuitBreaker::new(
                "embeddings",
                5,
                Duration::from_secs(60),
            )),
            timeout: AI_TIMEOUT,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Breaker status for health reporting.
    pub fn breaker_status(&self) -> crate::resilience::BreakerStatus {
        self.breaker.status()
    }

    /// Semantic similarity between two texts, rescaled to [0, 1].
    pub async fn semantic_similarity(&self, a: &str, b: &str) -> Result<f32, CoreError> {
        let embeddings = self
            .embed_batch(&[a.to_string(), b.to_string()])
            .await?;
        if embeddings.len() != 2 {
            return Err(CoreError::provider(
                "embeddings",
                "expected two embeddings for similarity",
            ));
        }
        Ok((cosine_similarity(&embeddings[0], &embeddings[1]) + 1.0) / 2.0)
    }

    async fn call_api(&self, input: Vec<String>, timeout: Duration) -> Result<Vec<Vec<f32>>, CoreError> {
        debug!(count = input.len(), model = %self.model, "requesting embeddings");

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            encoding_format: "float",
        };

        let fut = async {
            let response = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| CoreError::provider("embeddings", e))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| CoreError::provider("embeddings", e))?;

            if !status.is_success() {
                let message = serde_json::from_str::<ErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(CoreError::provider(
                    "embeddings",
                    format!("HTTP {status}: {message}"),
                ));
            }

            let parsed: EmbeddingResponse = serde_json::from_str(&body)
                .map_err(|e| CoreError::provider("embeddings", e))?;

            let mut data: Vec<(usize, Vec<f32>)> = parsed
                .data
                .into_iter()
                .map(|d| (d.index, d.embedding))
                .collect();
            data.sort_by_key(|(idx, _)| *idx);
            Ok(data.into_iter().map(|(_, e)| e).collect())
        };

        self.breaker
            .execute(with_timeout(fut, timeout, "embedding generation timeout"))
            .await
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation(
                "cannot generate embedding for empty text".to_string(),
            ));
        }

        let input = vec![truncate_chars(text, MAX_INPUT_CHARS)];
        let mut embeddings = self.call_api(input, self.timeout).await?;
        embeddings
            .pop()
            .ok_or_else(|| CoreError::provider("embeddings", "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let valid: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| truncate_chars(t, MAX_INPUT_CHARS))
            .collect();

        if valid.is_empty() {
            return Ok(vec![]);
        }

        // Batch calls get twice the single-call deadline.
        self.call_api(valid, self.timeout * 2).await
    }
}

/// Rough token estimate for accounting (~1 token per 4 characters).
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len().div_ceil(4)) as u32
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let service = EmbeddingService::new("test-key".to_string());
        assert_eq!(service.base_url(), "https://api.openai.com/v1");
        assert_eq!(service.model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let service = EmbeddingService::new("test-key".to_string());
        let err = service.embed("   ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_with_only_blank_texts_is_empty() {
        let service = EmbeddingService::new("test-key".to_string());
        let result = service
            .embed_batch(&["".to_string(), "  ".to_string()])
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let text = "çocuk".repeat(2000);
        let truncated = truncate_chars(&text, MAX_INPUT_CHARS);
        assert_eq!(truncated.chars().count(), MAX_INPUT_CHARS);
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
