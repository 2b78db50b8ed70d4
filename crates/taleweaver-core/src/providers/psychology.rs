//! ============================================================================
//! Psychologist Agent - Developmental analysis via Gemini
//! ============================================================================
//! Enriches the pipeline result with a developmental reading of the child's
//! interaction history. A deterministic age-bracket profile stands in when
//! the provider call fails, so analysis never blocks approved content.
//! ============================================================================

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::gemini::GeminiClient;
use super::{AnalysisRequest, DevelopmentAnalysis, DevelopmentAnalyst};
use crate::error::CoreError;

/// Developmental analyst backed by Gemini structured output.
pub struct GeminiAnalyst {
    client: GeminiClient,
}

impl GeminiAnalyst {
    pub fn new(api_key: String) -> Self {
        Self {
            client: GeminiClient::new(api_key),
        }
    }

    pub fn with_client(client: GeminiClient) -> Self {
        Self { client }
    }

    fn system_instruction(request: &AnalysisRequest) -> String {
        let history = if request.interactions.is_empty() {
            "no recorded interactions yet".to_string()
        } else {
            request
                .interactions
                .iter()
                .map(|i| format!("\"{}\" -> {}", i.story, i.reaction))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let patterns = if request.behavior_patterns.is_empty() {
            "none observed".to_string()
        } else {
            request.behavior_patterns.join(", ")
        };

        format!(
            "You are the child-development expert of a storytelling app. \
             Analyze this child's story interactions and advise the parents.\n\n\
             CHILD:\n\
             - Name: {name}\n\
             - Age: {age}\n\
             - Observed patterns: {patterns}\n\
             - Story reactions:\n{history}\n\n\
             Assess the developmental stage, infer the learning style, name \
             emotional needs, and recommend story themes and engagement tips \
             for the next stories. Respond in JSON.",
            name = request.child_name,
            age = request.child_age,
        )
    }

    fn response_schema() -> serde_json::Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "developmentalAssessment": { "type": "STRING" },
                "learningStyle": { "type": "STRING" },
                "emotionalNeeds": { "type": "ARRAY", "items": { "type": "STRING" } },
                "parentRecommendations": { "type": "ARRAY", "items": { "type": "STRING" } },
                "nextStoryThemes": { "type": "ARRAY", "items": { "type": "STRING" } },
                "culturalReadiness": { "type": "STRING" },
                "engagementTips": { "type": "ARRAY", "items": { "type": "STRING" } },
                "developmentalGoals": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": ["developmentalAssessment", "learningStyle"]
        })
    }
}

#[async_trait]
impl DevelopmentAnalyst for GeminiAnalyst {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<DevelopmentAnalysis, CoreError> {
        info!(child = %request.child_name, age = request.child_age, "analyzing development");

        let raw = self
            .client
            .generate_json(
                "psychologist",
                &Self::system_instruction(request),
                &format!(
                    "Provide the developmental analysis for {} described above.",
                    request.child_name
                ),
                Self::response_schema(),
            )
            .await?;

        serde_json::from_str(&raw).map_err(|e| {
            CoreError::provider("psychologist", format!("malformed analysis JSON: {e}"))
        })
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Deterministic fallback profile keyed off coarse age brackets. Used when
/// the analyst provider is unavailable.
pub fn age_bracket_analysis(child_age: u32) -> DevelopmentAnalysis {
    if child_age <= 4 {
        DevelopmentAnalysis {
            developmental_assessment: "Sensory exploration and early language growth phase"
                .to_string(),
            learning_style: "repetition, rhythm and vivid imagery".to_string(),
            emotional_needs: strings(&["security", "routine", "closeness"]),
            parent_recommendations: strings(&[
                "Revisit favorite stories often",
                "Name the animals and objects in the story together",
            ]),
            next_story_themes: strings(&["animal friends", "daily routines", "family"]),
            cultural_readiness: "simple traditions carried by songs and repetition".to_string(),
            engagement_tips: strings(&["Use sound effects and gestures while narrating"]),
            developmental_goals: strings(&["vocabulary growth", "sense of safety"]),
        }
    } else if child_age <= 7 {
        DevelopmentAnalysis {
            developmental_assessment: "Imaginative play and early reasoning phase".to_string(),
            learning_style: "stories, pretend play and guided discovery".to_string(),
            emotional_needs: strings(&["encouragement", "belonging", "gentle limits"]),
            parent_recommendations: strings(&[
                "Ask what the character should do next",
                "Connect story lessons to everyday situations",
            ]),
            next_story_themes: strings(&["friendship", "sharing", "small adventures"]),
            cultural_readiness: "ready for named traditions and simple celebrations".to_string(),
            engagement_tips: strings(&["Pause and let the child predict the ending"]),
            developmental_goals: strings(&["empathy", "cause-and-effect thinking"]),
        }
    } else {
        DevelopmentAnalysis {
            developmental_assessment: "Rule-based thinking and growing social awareness"
                .to_string(),
            learning_style: "problem solving, discussion and role models".to_string(),
            emotional_needs: strings(&["autonomy", "fairness", "recognition"]),
            parent_recommendations: strings(&[
                "Discuss the moral dilemma after the story",
                "Let the child retell the story in their own words",
            ]),
            next_story_themes: strings(&["responsibility", "courage", "community"]),
            cultural_readiness: "can explore the history and meaning behind traditions"
                .to_string(),
            engagement_tips: strings(&["Ask open questions about the characters' choices"]),
            developmental_goals: strings(&["moral reasoning", "perspective taking"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Interaction;

    #[test]
    fn test_system_instruction_includes_history() {
        let request = AnalysisRequest {
            child_name: "Ayse".to_string(),
            child_age: 6,
            interactions: vec![Interaction::new("The Brave Rabbit", "laughed a lot", vec![])],
            behavior_patterns: vec!["enthusiastic".to_string()],
        };
        let instruction = GeminiAnalyst::system_instruction(&request);
        assert!(instruction.contains("Ayse"));
        assert!(instruction.contains("\"The Brave Rabbit\" -> laughed a lot"));
        assert!(instruction.contains("enthusiastic"));
    }

    #[test]
    fn test_analysis_parses_from_schema_json() {
        let raw = r#"{
            "developmentalAssessment": "thriving",
            "learningStyle": "visual",
            "nextStoryThemes": ["sharing"]
        }"#;
        let analysis: DevelopmentAnalysis = serde_json::from_str(raw).unwrap();
        assert_eq!(analysis.learning_style, "visual");
        assert_eq!(analysis.next_story_themes, vec!["sharing"]);
        assert!(analysis.emotional_needs.is_empty());
    }

    #[test]
    fn test_age_brackets_differ() {
        let toddler = age_bracket_analysis(3);
        let early = age_bracket_analysis(6);
        let school = age_bracket_analysis(9);

        assert_ne!(toddler.learning_style, early.learning_style);
        assert_ne!(early.learning_style, school.learning_style);
    }

    #[test]
    fn test_age_bracket_boundaries() {
        assert_eq!(
            age_bracket_analysis(4).learning_style,
            age_bracket_analysis(0).learning_style
        );
        assert_eq!(
            age_bracket_analysis(5).learning_style,
            age_bracket_analysis(7).learning_style
        );
        assert_ne!(
            age_bracket_analysis(7).learning_style,
            age_bracket_analysis(8).learning_style
        );
    }
}
