//! ============================================================================
//! Configuration - Environment-driven settings for the story engine
//! ============================================================================
//! Provider keys, base URLs, model names and capacity bounds, read from the
//! environment with sensible defaults. Only the API keys are required.
//! ============================================================================

use std::env;

use crate::embeddings::DEFAULT_EMBEDDING_MODEL;
use crate::error::CoreError;
use crate::matcher::DEFAULT_STORY_CAPACITY;
use crate::memory::MemoryConfig;
use crate::observability::DEFAULT_METRICS_CAPACITY;
use crate::providers::{DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE, GEMINI_BASE_URL, GEMINI_MODEL};

/// Engine configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub memory: MemoryConfig,
    pub story_capacity: usize,
    pub metrics_capacity: usize,
}

impl CoreConfig {
    /// Read configuration from environment variables.
    ///
    /// Required: `GEMINI_API_KEY`, `OPENAI_API_KEY`. Everything else falls
    /// back to the built-in defaults.
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_base_url: var_or("GEMINI_BASE_URL", GEMINI_BASE_URL),
            gemini_model: var_or("GEMINI_MODEL", GEMINI_MODEL),
            openai_api_key: require("OPENAI_API_KEY")?,
            openai_base_url: var_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            embedding_model: var_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            tts_model: var_or("TTS_MODEL", DEFAULT_TTS_MODEL),
            tts_voice: var_or("TTS_VOICE", DEFAULT_TTS_VOICE),
            memory: MemoryConfig {
                max_interactions_per_child: var_usize("TALEWEAVER_MAX_INTERACTIONS", 50)?,
                max_children: var_usize("TALEWEAVER_MAX_CHILDREN", 500)?,
                index_capacity: var_usize("TALEWEAVER_INTERACTION_CAPACITY", 5000)?,
                ..MemoryConfig::default()
            },
            story_capacity: var_usize("TALEWEAVER_STORY_CAPACITY", DEFAULT_STORY_CAPACITY)?,
            metrics_capacity: var_usize("TALEWEAVER_METRICS_CAPACITY", DEFAULT_METRICS_CAPACITY)?,
        })
    }
}

fn require(name: &str) -> Result<String, CoreError> {
    env::var(name).map_err(|_| CoreError::Validation(format!("{name} is not set")))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn var_usize(name: &str, default: usize) -> Result<usize, CoreError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{name} must be a non-negative integer, got '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_usize_default_and_parse() {
        assert_eq!(var_usize("TALEWEAVER_TEST_UNSET", 42).unwrap(), 42);

        env::set_var("TALEWEAVER_TEST_USIZE_OK", "7");
        assert_eq!(var_usize("TALEWEAVER_TEST_USIZE_OK", 42).unwrap(), 7);
        env::remove_var("TALEWEAVER_TEST_USIZE_OK");

        env::set_var("TALEWEAVER_TEST_USIZE_BAD", "many");
        let err = var_usize("TALEWEAVER_TEST_USIZE_BAD", 42).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        env::remove_var("TALEWEAVER_TEST_USIZE_BAD");
    }

    #[test]
    fn test_require_missing_key() {
        let err = require("TALEWEAVER_TEST_MISSING_KEY").unwrap_err();
        assert!(err.to_string().contains("TALEWEAVER_TEST_MISSING_KEY"));
    }

    #[test]
    fn test_var_or_fallback() {
        assert_eq!(var_or("TALEWEAVER_TEST_UNSET_STR", "fallback"), "fallback");
    }
}
