//! ============================================================================
//! TALEWEAVER-CORE: Story Engine Infrastructure
//! ============================================================================
//! This crate holds the in-process primitives behind the AI story pipeline:
//! - Bounded in-memory vector index with cosine similarity search
//! - Per-child personalization memory with semantic recall
//! - Story matcher for similarity search and recommendations
//! - Circuit breaker / timeout / prompt sanitization guardrails
//! - Per-operation metrics with latency percentiles
//! - Multi-stage generation pipeline over external AI providers
//! ============================================================================

pub mod config;
pub mod embeddings;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod vector;

// Re-export main types for convenience
pub use config::CoreConfig;
pub use embeddings::{Embedder, EmbeddingService};
pub use error::CoreError;
pub use matcher::{RecommendParams, StoryMatcher, StoryRecommendation};
pub use memory::{Interaction, MemoryConfig, Personalization, PersonalizationMemory};
pub use observability::{Observability, OperationStatus};
pub use orchestrator::{StoryBundle, StoryPipeline, StoryPipelineRequest};
pub use resilience::{sanitize_prompt_input, with_timeout, CircuitBreaker};
pub use vector::{VectorDocument, VectorStore};
