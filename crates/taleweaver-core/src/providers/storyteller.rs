//! ============================================================================
//! Storyteller Agent - Personalized story generation via Gemini
//! ============================================================================
//! Folds the child's personalization context (traits, preferences, recent
//! reactions) into the system instruction and asks for a structured story
//! conforming to a declared JSON schema.
//! ============================================================================

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::gemini::GeminiClient;
use super::{PersonalizedStory, StoryGenerator, StoryRequest};
use crate::error::CoreError;

/// Story generator backed by Gemini structured output.
pub struct GeminiStoryteller {
    client: GeminiClient,
}

impl GeminiStoryteller {
    pub fn new(api_key: String) -> Self {
        Self {
            client: GeminiClient::new(api_key),
        }
    }

    pub fn with_client(client: GeminiClient) -> Self {
        Self { client }
    }

    fn system_instruction(request: &StoryRequest) -> String {
        let p = &request.personalization;

        let traits = if p.personality_traits.is_empty() {
            "curious, affectionate".to_string()
        } else {
            p.personality_traits.join(", ")
        };
        let preferences = if p.preferences.is_empty() {
            "animal stories, adventure".to_string()
        } else {
            p.preferences.join(", ")
        };
        let history = if p.recent_interactions.is_empty() {
            "first story".to_string()
        } else {
            p.recent_interactions
                .iter()
                .map(|i| format!("\"{}\" -> {}", i.story, i.reaction))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "You are the cultural storytelling expert of a children's education app. \
             Create an ultra-personalized story grounded in the child's profile and \
             past reactions.\n\n\
             CHILD PROFILE:\n\
             - Name: {name}\n\
             - Age: {age}\n\
             - Personality: {traits}\n\
             - Preferences: {preferences}\n\
             - Past reactions: {history}\n\n\
             Parent's message: \"{message}\"\n\
             Cultural theme: {theme}\n\n\
             INSTRUCTIONS:\n\
             1. Use language matched to the child's age and personality\n\
             2. Weave in preferences learned from past reactions\n\
             3. Integrate traditional cultural values naturally\n\
             4. Use the child's name organically in the story\n\
             5. Express the parent's value message at the child's level\n\n\
             Respond in JSON.",
            name = request.child_name,
            age = request.child_age,
            traits = traits,
            preferences = preferences,
            history = history,
            message = request.parent_message,
            theme = request.cultural_theme,
        )
    }

    fn response_schema() -> serde_json::Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "content": { "type": "STRING" },
                "moralLesson": { "type": "STRING" },
                "personalizedElements": { "type": "ARRAY", "items": { "type": "STRING" } },
                "culturalElements": { "type": "ARRAY", "items": { "type": "STRING" } },
                "ageAppropriate": { "type": "BOOLEAN" },
                "emotionalTone": { "type": "STRING" },
                "interactiveCues": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": [
                "title", "content", "moralLesson",
                "personalizedElements", "culturalElements", "ageAppropriate"
            ]
        })
    }
}

#[async_trait]
impl StoryGenerator for GeminiStoryteller {
    async fn generate(&self, request: &StoryRequest) -> Result<PersonalizedStory, CoreError> {
        info!(child = %request.child_name, theme = %request.cultural_theme, "generating story");

        let raw = self
            .client
            .generate_json(
                "storyteller",
                &Self::system_instruction(request),
                &format!(
                    "Using the profile and instructions above, create a special story for {}.",
                    request.child_name
                ),
                Self::response_schema(),
            )
            .await?;

        serde_json::from_str(&raw).map_err(|e| {
            CoreError::provider("storyteller", format!("malformed story JSON: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Interaction, Personalization};

    fn request() -> StoryRequest {
        StoryRequest {
            child_name: "Ayse".to_string(),
            child_age: 6,
            parent_message: "sharing matters".to_string(),
            cultural_theme: "hospitality".to_string(),
            personalization: Personalization {
                recent_interactions: vec![Interaction::new(
                    "The Brave Rabbit",
                    "laughed a lot",
                    vec![],
                )],
                preferences: vec!["animals".to_string()],
                personality_traits: vec!["enthusiastic".to_string()],
            },
        }
    }

    #[test]
    fn test_system_instruction_includes_profile() {
        let instruction = GeminiStoryteller::system_instruction(&request());
        assert!(instruction.contains("Ayse"));
        assert!(instruction.contains("enthusiastic"));
        assert!(instruction.contains("animals"));
        assert!(instruction.contains("\"The Brave Rabbit\" -> laughed a lot"));
        assert!(instruction.contains("hospitality"));
    }

    #[test]
    fn test_system_instruction_defaults_for_new_child() {
        let mut req = request();
        req.personalization = Personalization::default();
        let instruction = GeminiStoryteller::system_instruction(&req);
        assert!(instruction.contains("first story"));
        assert!(instruction.contains("curious, affectionate"));
    }

    #[test]
    fn test_story_parses_from_schema_json() {
        let raw = r#"{
            "title": "Ayse and the Guest",
            "content": "Once upon a time...",
            "moralLesson": "Guests bring joy",
            "personalizedElements": ["uses her name"],
            "culturalElements": ["hospitality"],
            "ageAppropriate": true
        }"#;
        let story: PersonalizedStory = serde_json::from_str(raw).unwrap();
        assert_eq!(story.title, "Ayse and the Guest");
        assert!(story.age_appropriate);
        assert!(story.interactive_cues.is_empty());
        assert!(story.emotional_tone.is_none());
    }
}
