//! ============================================================================
//! Gemini Client - Structured JSON generation via the Gemini REST API
//! ============================================================================
//! Shared plumbing for the Gemini-backed agents: each call declares a JSON
//! response schema and gets back the raw JSON text of the first candidate.
//! ============================================================================

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CoreError;

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used by all Gemini-backed agents.
pub const GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Thin client over the `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: ContentBlock,
    contents: Vec<ContentBlock>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ContentBlock {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::new_custom(api_key, GEMINI_BASE_URL.to_string(), GEMINI_MODEL.to_string())
    }

    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    /// Call `generateContent` with a declared JSON response schema and return
    /// the raw JSON text of the first candidate.
    pub async fn generate_json(
        &self,
        agent: &str,
        system_instruction: &str,
        user_text: &str,
        response_schema: Value,
    ) -> Result<String, CoreError> {
        debug!(agent, model = %self.model, "calling Gemini generateContent");

        let request = GenerateContentRequest {
            system_instruction: ContentBlock {
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            },
            contents: vec![ContentBlock {
                parts: vec![Part {
                    text: user_text.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::provider(agent, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::provider(agent, e))?;

        if !status.is_success() {
            return Err(CoreError::provider(
                agent,
                format!("HTTP {status}: {body}"),
            ));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| CoreError::provider(agent, e))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(CoreError::provider(agent, "empty response from Gemini"));
        }

        Ok(text)
    }
}
