//! ============================================================================
//! Providers Module - External AI agents behind trait seams
//! ============================================================================
//! Contains the provider interfaces the pipeline composes and their HTTP
//! implementations:
//! - GeminiStoryteller: personalized story generation (structured JSON)
//! - GeminiGuardian: content safety validation with a local score floor
//! - GeminiAnalyst: developmental analysis with a rule-based fallback
//! - OpenAiSpeech: text-to-speech synthesis
//! ============================================================================

mod gemini;
mod guardian;
mod psychology;
mod speech;
mod storyteller;

pub use gemini::{GeminiClient, GEMINI_BASE_URL, GEMINI_MODEL};
pub use guardian::{GeminiGuardian, MIN_AGE_APPROPRIATE_SCORE, MIN_SAFETY_SCORE};
pub use psychology::{age_bracket_analysis, GeminiAnalyst};
pub use speech::{OpenAiSpeech, DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE};
pub use storyteller::GeminiStoryteller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::memory::{Interaction, Personalization};

/// Request for personalized story generation.
#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub child_name: String,
    pub child_age: u32,
    /// Parent's value message, already sanitized by the pipeline.
    pub parent_message: String,
    pub cultural_theme: String,
    pub personalization: Personalization,
}

/// Structured story returned by a generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedStory {
    pub title: String,
    pub content: String,
    pub moral_lesson: String,
    #[serde(default)]
    pub personalized_elements: Vec<String>,
    #[serde(default)]
    pub cultural_elements: Vec<String>,
    pub age_appropriate: bool,
    #[serde(default)]
    pub emotional_tone: Option<String>,
    #[serde(default)]
    pub interactive_cues: Vec<String>,
}

/// Validation verdict from the safety gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentValidation {
    pub approved: bool,
    pub overall_score: f32,
    pub age_appropriate_score: f32,
    pub cultural_alignment_score: f32,
    pub safety_score: f32,
    #[serde(default)]
    pub educational_value: f32,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

impl ContentValidation {
    /// Force-reject when safety or age-appropriateness falls below the fixed
    /// minimum, regardless of the provider's own verdict. Idempotent, so the
    /// pipeline can re-apply it to any validator's output.
    pub fn enforce_score_floor(&mut self) {
        if self.approved
            && (self.safety_score < MIN_SAFETY_SCORE
                || self.age_appropriate_score < MIN_AGE_APPROPRIATE_SCORE)
        {
            self.approved = false;
            self.concerns.push(
                "safety or age-appropriateness score below the minimum threshold".to_string(),
            );
        }
    }
}

/// Request for developmental analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub child_name: String,
    pub child_age: u32,
    pub interactions: Vec<Interaction>,
    pub behavior_patterns: Vec<String>,
}

/// Developmental analysis of a child's interaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevelopmentAnalysis {
    pub developmental_assessment: String,
    pub learning_style: String,
    #[serde(default)]
    pub emotional_needs: Vec<String>,
    #[serde(default)]
    pub parent_recommendations: Vec<String>,
    #[serde(default)]
    pub next_story_themes: Vec<String>,
    #[serde(default)]
    pub cultural_readiness: String,
    #[serde(default)]
    pub engagement_tips: Vec<String>,
    #[serde(default)]
    pub developmental_goals: Vec<String>,
}

/// Generates personalized stories.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate(&self, request: &StoryRequest) -> Result<PersonalizedStory, CoreError>;
}

/// Validates generated content for child safety.
#[async_trait]
pub trait ContentValidator: Send + Sync {
    async fn validate(
        &self,
        content: &str,
        child_age: u32,
        personality_traits: &[String],
    ) -> Result<ContentValidation, CoreError>;
}

/// Analyzes developmental needs from interaction history.
#[async_trait]
pub trait DevelopmentAnalyst: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<DevelopmentAnalysis, CoreError>;
}

/// Synthesizes speech audio from story text.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError>;
}
