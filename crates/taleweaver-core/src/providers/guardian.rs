//! ============================================================================
//! Guardian Agent - Content safety validation via Gemini
//! ============================================================================
//! Reviews a generated story before it reaches the child. The provider's
//! verdict is advisory: a local score floor can force rejection regardless
//! of what the model approved.
//! ============================================================================

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::gemini::GeminiClient;
use super::{ContentValidation, ContentValidator};
use crate::error::CoreError;

/// Safety score floor. Content below this is rejected even when approved.
pub const MIN_SAFETY_SCORE: f32 = 6.0;

/// Age-appropriateness score floor.
pub const MIN_AGE_APPROPRIATE_SCORE: f32 = 5.0;

/// Safety gate backed by Gemini structured output.
pub struct GeminiGuardian {
    client: GeminiClient,
}

impl GeminiGuardian {
    pub fn new(api_key: String) -> Self {
        Self {
            client: GeminiClient::new(api_key),
        }
    }

    pub fn with_client(client: GeminiClient) -> Self {
        Self { client }
    }

    fn system_instruction(child_age: u32, personality_traits: &[String]) -> String {
        let traits = if personality_traits.is_empty() {
            "not yet known".to_string()
        } else {
            personality_traits.join(", ")
        };

        format!(
            "You are the guardian agent of a children's education app, reviewing \
             a generated story before it reaches a {child_age}-year-old child \
             (personality: {traits}).\n\n\
             Evaluate the story on:\n\
             1. ageAppropriateScore - vocabulary and concepts fit the age\n\
             2. culturalAlignmentScore - cultural content is respectful and accurate\n\
             3. safetyScore - free of violence, fear and adult themes\n\
             4. educationalValue - carries a clear, constructive lesson\n\n\
             Score each dimension 0-10 and give an overallScore. Approve only \
             when the story is fully suitable. List concrete concerns, \
             improvements and strengths. Respond in JSON."
        )
    }

    fn response_schema() -> serde_json::Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "approved": { "type": "BOOLEAN" },
                "overallScore": { "type": "NUMBER" },
                "ageAppropriateScore": { "type": "NUMBER" },
                "culturalAlignmentScore": { "type": "NUMBER" },
                "safetyScore": { "type": "NUMBER" },
                "educationalValue": { "type": "NUMBER" },
                "concerns": { "type": "ARRAY", "items": { "type": "STRING" } },
                "improvements": { "type": "ARRAY", "items": { "type": "STRING" } },
                "strengths": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": [
                "approved", "overallScore", "ageAppropriateScore",
                "culturalAlignmentScore", "safetyScore"
            ]
        })
    }
}

#[async_trait]
impl ContentValidator for GeminiGuardian {
    async fn validate(
        &self,
        content: &str,
        child_age: u32,
        personality_traits: &[String],
    ) -> Result<ContentValidation, CoreError> {
        info!(child_age, "validating story content");

        let raw = self
            .client
            .generate_json(
                "guardian",
                &Self::system_instruction(child_age, personality_traits),
                &format!("STORY TO REVIEW:\n\n{content}"),
                Self::response_schema(),
            )
            .await?;

        let mut validation: ContentValidation = serde_json::from_str(&raw).map_err(|e| {
            CoreError::provider("guardian", format!("malformed validation JSON: {e}"))
        })?;

        validation.enforce_score_floor();
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instruction_includes_context() {
        let instruction =
            GeminiGuardian::system_instruction(6, &["enthusiastic".to_string()]);
        assert!(instruction.contains("6-year-old"));
        assert!(instruction.contains("enthusiastic"));
    }

    #[test]
    fn test_validation_parses_from_schema_json() {
        let raw = r#"{
            "approved": true,
            "overallScore": 8.5,
            "ageAppropriateScore": 9.0,
            "culturalAlignmentScore": 8.0,
            "safetyScore": 9.5,
            "educationalValue": 7.0,
            "concerns": [],
            "strengths": ["gentle tone"]
        }"#;
        let validation: ContentValidation = serde_json::from_str(raw).unwrap();
        assert!(validation.approved);
        assert_eq!(validation.strengths, vec!["gentle tone"]);
        assert!(validation.improvements.is_empty());
    }

    #[test]
    fn test_floor_overrides_provider_approval() {
        let raw = r#"{
            "approved": true,
            "overallScore": 7.0,
            "ageAppropriateScore": 8.0,
            "culturalAlignmentScore": 7.0,
            "safetyScore": 4.0
        }"#;
        let mut validation: ContentValidation = serde_json::from_str(raw).unwrap();
        validation.enforce_score_floor();
        assert!(!validation.approved);
        assert!(!validation.concerns.is_empty());
    }
}
