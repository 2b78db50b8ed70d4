//! ============================================================================
//! Personalization Memory - Bounded per-child interaction history
//! ============================================================================
//! Tracks how each child reacted to past stories and keeps a semantic index
//! of those interactions for recall during generation:
//!
//! ```text
//! Story played -> Reaction recorded -> Profile updated + Embedded
//!                                              |
//!                       Next generation <- Recall (traits, preferences,
//!                                          similar past interactions)
//! ```
//!
//! Indexing is best-effort: an embeddings outage degrades recall quality but
//! never fails the write path.
//! ============================================================================

mod manager;
mod types;

pub use manager::{MemoryConfig, PersonalizationMemory};
pub use types::{ChildProfile, Interaction, InteractionMatch, Personalization};
