//! ============================================================================
//! Memory Types - Data structures for child personalization
//! ============================================================================

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One recorded story interaction for a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Story title or short content reference.
    pub story: String,
    /// How the child reacted, free text ("laughed a lot", "asked questions").
    pub reaction: String,
    /// Preference tags observed during the interaction.
    pub tags: Vec<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Interaction {
    pub fn new(
        story: impl Into<String>,
        reaction: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            story: story.into(),
            reaction: reaction.into(),
            tags,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Composite text used for semantic indexing.
    pub fn composite_text(&self) -> String {
        format!(
            "{}\nReaction: {}\nTags: {}",
            self.story,
            self.reaction,
            self.tags.join(", ")
        )
    }
}

/// Per-child profile. Interaction list is bounded by the memory config;
/// preferences accumulate as the union of interaction tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildProfile {
    pub interactions: Vec<Interaction>,
    pub preferences: BTreeSet<String>,
}

/// Personalization snapshot handed to the generation pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Personalization {
    /// Most recent interactions, oldest first.
    pub recent_interactions: Vec<Interaction>,
    pub preferences: Vec<String>,
    /// Traits derived from reaction text by keyword heuristics.
    pub personality_traits: Vec<String>,
}

/// A semantically similar past interaction.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionMatch {
    pub content: String,
    pub similarity: f32,
    pub child_id: Option<String>,
    pub timestamp: i64,
}
