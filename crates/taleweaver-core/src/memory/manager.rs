//! ============================================================================
//! Personalization Memory Manager - Profiles + semantic interaction index
//! ============================================================================
//! High-level API for recording story interactions and recalling
//! personalization context. Profile mutation is synchronous under a lock;
//! the only suspension points are embeddings calls, which happen after the
//! lock is released.
//! ============================================================================

use std::collections::{HashMap, VecDeque};
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::types::{ChildProfile, Interaction, InteractionMatch, Personalization};
use crate::embeddings::Embedder;
use crate::vector::{DocMetadata, MetadataFilter, VectorDocument, VectorStore, VectorStoreStats};

/// Keyword families scanned over reaction text to derive traits. Explicit
/// and extensible; not a statistical model.
const TRAIT_KEYWORDS: &[(&str, &[&str])] = &[
    ("enthusiastic", &["excited", "happy", "laughed", "loved"]),
    ("reflective", &["quiet", "thoughtful", "calm"]),
    ("curious", &["question", "curious", "asked", "why"]),
];

/// How many recent interactions a personalization snapshot carries.
const RECENT_INTERACTIONS: usize = 5;

/// Bounds for the personalization memory.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Interactions kept per child; oldest trimmed first.
    pub max_interactions_per_child: usize,
    /// Tracked children; the oldest-inserted profile is evicted first.
    pub max_children: usize,
    /// Capacity of the semantic interaction index.
    pub index_capacity: usize,
    /// Similarity floor for interaction recall.
    pub search_floor: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_interactions_per_child: 50,
            max_children: 500,
            index_capacity: 5000,
            search_floor: 0.5,
        }
    }
}

struct ProfileTable {
    children: HashMap<String, ChildProfile>,
    /// Insertion order of child ids, for FIFO profile eviction.
    order: VecDeque<String>,
}

/// Bounded per-child interaction memory with a VectorStore-backed semantic
/// index of interaction composites.
pub struct PersonalizationMemory {
    profiles: RwLock<ProfileTable>,
    index: VectorStore,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl PersonalizationMemory {
    pub fn new(embedder: Arc<dyn Embedder>, config: MemoryConfig) -> Self {
        Self {
            profiles: RwLock::new(ProfileTable {
                children: HashMap::new(),
                order: VecDeque::new(),
            }),
            index: VectorStore::new(config.index_capacity),
            embedder,
            config,
        }
    }

    /// Record an interaction: update the bounded profile synchronously, then
    /// best-effort embed the interaction into the semantic index. Embedding
    /// failures are logged and never fail the call.
    pub async fn add_interaction(&self, child_id: &str, interaction: Interaction) {
        let evicted = {
            let mut table = self.profiles.write();

            if !table.children.contains_key(child_id) {
                table.order.push_back(child_id.to_string());
            }
            let profile = table.children.entry(child_id.to_string()).or_default();

            profile.interactions.push(interaction.clone());
            let max = self.config.max_interactions_per_child;
            if profile.interactions.len() > max {
                let overflow = profile.interactions.len() - max;
                profile.interactions.drain(..overflow);
            }
            for tag in &interaction.tags {
                profile.preferences.insert(tag.clone());
            }

            let mut evicted = None;
            if table.children.len() > self.config.max_children {
                if let Some(oldest) = table.order.pop_front() {
                    table.children.remove(&oldest);
                    info!(child_id = %oldest, "evicted oldest child profile");
                    evicted = Some(oldest);
                }
            }
            evicted
        };

        // An evicted child's indexed interactions go with the profile.
        if let Some(oldest) = evicted {
            self.remove_indexed_interactions(&oldest);
        }

        self.index_interaction(child_id, &interaction).await;
    }

    /// Personalization snapshot: recent interactions, preference list and
    /// derived traits. Unknown children get empty defaults.
    pub fn get_personalization(&self, child_id: &str) -> Personalization {
        let table = self.profiles.read();
        let Some(profile) = table.children.get(child_id) else {
            return Personalization::default();
        };

        let recent_count = RECENT_INTERACTIONS.min(self.config.max_interactions_per_child);
        let skip = profile.interactions.len().saturating_sub(recent_count);

        Personalization {
            recent_interactions: profile.interactions[skip..].to_vec(),
            preferences: profile.preferences.iter().cloned().collect(),
            personality_traits: analyze_personality_traits(&profile.interactions),
        }
    }

    /// Semantic recall over past interactions, optionally restricted to one
    /// child. Lookup failures degrade to an empty result so personalization
    /// never blocks the generation flow.
    pub async fn find_similar_interactions(
        &self,
        query: &str,
        child_id: Option<&str>,
        top_k: usize,
    ) -> Vec<InteractionMatch> {
        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(error = %err, "interaction recall failed to embed query");
                return Vec::new();
            }
        };

        let results = match self.index.search(&query_embedding, top_k, self.config.search_floor) {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "interaction recall search failed");
                return Vec::new();
            }
        };

        results
            .into_iter()
            .filter(|r| match child_id {
                Some(id) => r.document.metadata.child_id.as_deref() == Some(id),
                None => true,
            })
            .map(|r| InteractionMatch {
                content: r.document.text,
                similarity: r.similarity,
                child_id: r.document.metadata.child_id,
                timestamp: r.document.timestamp,
            })
            .collect()
    }

    /// Recall by preference tags, joined into a single query.
    pub async fn find_by_preferences(
        &self,
        preferences: &[String],
        child_id: Option<&str>,
        top_k: usize,
    ) -> Vec<InteractionMatch> {
        let query = preferences.join(", ");
        self.find_similar_interactions(&query, child_id, top_k).await
    }

    /// Semantic index statistics for monitoring.
    pub fn vector_stats(&self) -> VectorStoreStats {
        self.index.stats()
    }

    /// Number of tracked children.
    pub fn profile_count(&self) -> usize {
        self.profiles.read().children.len()
    }

    async fn index_interaction(&self, child_id: &str, interaction: &Interaction) {
        let text = interaction.composite_text();

        let embedding = match self.embedder.embed(&text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(child_id, error = %err, "failed to embed interaction; skipping index");
                return;
            }
        };

        let metadata = DocMetadata {
            child_id: Some(child_id.to_string()),
            tags: interaction.tags.clone(),
            ..DocMetadata::default()
        };
        let mut doc = VectorDocument::new(
            uuid::Uuid::new_v4().to_string(),
            text,
            embedding,
            metadata,
        );
        doc.timestamp = interaction.timestamp;

        if let Err(err) = self.index.add(doc) {
            warn!(child_id, error = %err, "failed to index interaction");
        } else {
            debug!(child_id, "indexed interaction");
        }
    }

    fn remove_indexed_interactions(&self, child_id: &str) {
        let filter = MetadataFilter::for_child(child_id);
        let docs = self.index.search_by_metadata(&filter, usize::MAX);
        let count = docs.len();
        for doc in docs {
            self.index.delete(&doc.id);
        }
        if count > 0 {
            debug!(child_id, count, "removed indexed interactions for evicted child");
        }
    }
}

fn analyze_personality_traits(interactions: &[Interaction]) -> Vec<String> {
    let mut traits = BTreeSet::new();

    for interaction in interactions {
        let reaction = interaction.reaction.to_lowercase();
        for (trait_name, keywords) in TRAIT_KEYWORDS {
            if keywords.iter().any(|k| reaction.contains(k)) {
                traits.insert(trait_name.to_string());
            }
        }
    }

    traits.into_iter().collect()
}
