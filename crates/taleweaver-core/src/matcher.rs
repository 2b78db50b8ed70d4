//! ============================================================================
//! Story Matcher - Semantic similarity search and recommendations
//! ============================================================================
//! Indexes generated stories into a dedicated vector store and supports:
//! - Nearest-neighbor lookup from an existing story
//! - Free-text, theme and value based search
//! - Personalized recommendations: retrieve generously, then re-rank with
//!   cheap, explainable age and preference bonuses
//! ============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::error::CoreError;
use crate::vector::{DocMetadata, VectorDocument, VectorStore, VectorStoreStats};

/// Default capacity of the story index.
pub const DEFAULT_STORY_CAPACITY: usize = 10_000;

/// Bonus for an exact age match; penalty for a distant one.
const AGE_BONUS: f32 = 0.1;
/// Bonus per matched preference tag.
const PREFERENCE_BONUS: f32 = 0.05;

/// A story to index.
#[derive(Debug, Clone)]
pub struct StoryRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub child_age: u32,
    pub theme: String,
    pub values: Vec<String>,
}

/// A story returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct StoryMatch {
    pub story_id: String,
    pub title: String,
    pub content: String,
    pub similarity: f32,
    pub child_age: u32,
    pub theme: String,
    pub values: Vec<String>,
    pub timestamp: i64,
}

/// A recommendation with its re-ranked confidence and a human-readable
/// explanation of which bonuses applied.
#[derive(Debug, Clone, Serialize)]
pub struct StoryRecommendation {
    pub story: StoryMatch,
    pub reason: String,
    pub confidence: f32,
}

/// Parameters for personalized recommendations.
#[derive(Debug, Clone)]
pub struct RecommendParams {
    pub child_age: u32,
    pub preferences: Vec<String>,
    /// Stories the child has already heard.
    pub exclude_story_ids: Vec<String>,
    pub top_k: usize,
}

/// Semantic story index and recommender.
pub struct StoryMatcher {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
}

impl StoryMatcher {
    pub fn new(embedder: Arc<dyn Embedder>, max_stories: usize) -> Self {
        Self {
            store: VectorStore::new(max_stories),
            embedder,
        }
    }

    /// Index a story. The embedding covers a composite of title, content,
    /// theme and values so thematic queries land well.
    pub async fn index_story(&self, story: &StoryRecord) -> Result<(), CoreError> {
        let composite = format!(
            "{}\n{}\nTheme: {}\nValues: {}",
            story.title,
            story.content,
            story.theme,
            story.values.join(", ")
        );

        let embedding = self.embedder.embed(&composite).await?;

        let metadata = DocMetadata {
            title: Some(story.title.clone()),
            child_age: Some(story.child_age),
            theme: Some(story.theme.clone()),
            tags: story.values.clone(),
            ..DocMetadata::default()
        };

        self.store
            .add(VectorDocument::new(&story.id, composite, embedding, metadata))?;
        info!(story_id = %story.id, title = %story.title, "indexed story");
        Ok(())
    }

    /// Nearest neighbors of an already-indexed story, excluding the story
    /// itself. Unknown ids return an empty list.
    pub fn find_similar(
        &self,
        story_id: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<StoryMatch> {
        let Some(source) = self.store.get(story_id) else {
            warn!(story_id, "story not found in index");
            return Vec::new();
        };

        match self.store.search(&source.embedding, top_k + 1, min_similarity) {
            Ok(results) => results
                .into_iter()
                .filter(|r| r.document.id != story_id)
                .take(top_k)
                .map(|r| to_match(r.document, r.similarity))
                .collect(),
            Err(err) => {
                warn!(story_id, error = %err, "similar story search failed");
                Vec::new()
            }
        }
    }

    /// Free-text semantic search. Failures degrade to an empty result.
    pub async fn search_by_query(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<StoryMatch> {
        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(error = %err, "story query embedding failed");
                return Vec::new();
            }
        };

        match self.store.search(&embedding, top_k, min_similarity) {
            Ok(results) => results
                .into_iter()
                .map(|r| to_match(r.document, r.similarity))
                .collect(),
            Err(err) => {
                warn!(error = %err, "story query search failed");
                Vec::new()
            }
        }
    }

    /// Stories matching a cultural theme.
    pub async fn find_by_theme(&self, theme: &str, top_k: usize) -> Vec<StoryMatch> {
        self.search_by_query(&format!("Stories with cultural theme: {theme}"), top_k, 0.6)
            .await
    }

    /// Stories teaching specific values.
    pub async fn find_by_values(&self, values: &[String], top_k: usize) -> Vec<StoryMatch> {
        let query = format!("Stories teaching these values: {}", values.join(", "));
        self.search_by_query(&query, top_k, 0.65).await
    }

    /// Personalized recommendations. Retrieves 2x the requested count at a
    /// lower similarity floor, drops excluded stories, then re-ranks with
    /// age-proximity and preference-overlap bonuses.
    pub async fn recommend(&self, params: &RecommendParams) -> Vec<StoryRecommendation> {
        let query = format!(
            "Age {} child likes: {}",
            params.child_age,
            params.preferences.join(", ")
        );

        let candidates = self
            .search_by_query(&query, params.top_k * 2, 0.5)
            .await;

        let mut recommendations: Vec<StoryRecommendation> = candidates
            .into_iter()
            .filter(|m| !params.exclude_story_ids.contains(&m.story_id))
            .map(|story| score_candidate(story, params))
            .collect();

        recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        recommendations.truncate(params.top_k);

        debug!(count = recommendations.len(), "built story recommendations");
        recommendations
    }

    /// Index statistics for monitoring.
    pub fn stats(&self) -> VectorStoreStats {
        self.store.stats()
    }

    /// Remove every indexed story.
    pub fn clear(&self) {
        self.store.clear();
        info!("cleared story index");
    }
}

fn to_match(doc: VectorDocument, similarity: f32) -> StoryMatch {
    StoryMatch {
        story_id: doc.id,
        title: doc.metadata.title.unwrap_or_default(),
        content: doc.text,
        similarity,
        child_age: doc.metadata.child_age.unwrap_or_default(),
        theme: doc.metadata.theme.unwrap_or_default(),
        values: doc.metadata.tags,
        timestamp: doc.timestamp,
    }
}

fn score_candidate(story: StoryMatch, params: &RecommendParams) -> StoryRecommendation {
    let mut confidence = story.similarity;
    let mut reason;

    let age_diff = story.child_age.abs_diff(params.child_age);
    if age_diff == 0 {
        reason = "matches the age group exactly".to_string();
        confidence += AGE_BONUS;
    } else if age_diff <= 2 {
        reason = "close to the age group".to_string();
    } else {
        reason = "different age group".to_string();
        confidence -= AGE_BONUS;
    }

    let matched = story
        .values
        .iter()
        .filter(|value| {
            params.preferences.iter().any(|pref| {
                let v = value.to_lowercase();
                let p = pref.to_lowercase();
                v.contains(&p) || p.contains(&v)
            })
        })
        .count();

    if matched > 0 {
        reason.push_str(&format!(", {matched} preference match(es)"));
        confidence += matched as f32 * PREFERENCE_BONUS;
    }

    StoryRecommendation {
        story,
        reason,
        confidence: confidence.min(1.0),
    }
}
