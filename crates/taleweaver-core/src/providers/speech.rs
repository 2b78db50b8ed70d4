//! ============================================================================
//! Voice Agent - Story narration via OpenAI text-to-speech
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::SpeechSynthesizer;
use crate::error::CoreError;

/// Default TTS model.
pub const DEFAULT_TTS_MODEL: &str = "tts-1";

/// Default narration voice.
pub const DEFAULT_TTS_VOICE: &str = "nova";

/// Provider-side input limit for one synthesis call.
const MAX_TTS_INPUT_CHARS: usize = 4096;

/// Speech synthesizer backed by an OpenAI-compatible `audio/speech` endpoint.
pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest {
    model: String,
    input: String,
    voice: String,
    response_format: &'static str,
}

impl OpenAiSpeech {
    pub fn new(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            "https://api.openai.com/v1".to_string(),
            DEFAULT_TTS_MODEL.to_string(),
            DEFAULT_TTS_VOICE.to_string(),
        )
    }

    pub fn new_custom(api_key: String, base_url: String, model: String, voice: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
            voice,
        }
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    /// Synthesize narration audio (mp3 bytes) for a story text.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation(
                "cannot synthesize speech for empty text".to_string(),
            ));
        }

        let input: String = text.chars().take(MAX_TTS_INPUT_CHARS).collect();
        info!(chars = input.len(), voice = %self.voice, "synthesizing story audio");

        let request = SpeechRequest {
            model: self.model.clone(),
            input,
            voice: self.voice.clone(),
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::provider("voice", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::provider(
                "voice",
                format!("HTTP {status}: {body}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::provider("voice", e))?;

        info!(bytes = bytes.len(), "story audio synthesized");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let speech = OpenAiSpeech::new("test-key".to_string());
        assert_eq!(speech.voice(), DEFAULT_TTS_VOICE);
        assert_eq!(speech.base_url, "https://api.openai.com/v1");
        assert_eq!(speech.model, DEFAULT_TTS_MODEL);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let speech = OpenAiSpeech::new("test-key".to_string());
        let err = speech.synthesize("   ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
