//! ============================================================================
//! Vector Store - In-memory semantic index with cosine similarity search
//! ============================================================================
//! Bounded collection of embedded documents supporting:
//! - Brute-force cosine similarity search (fine up to tens of thousands
//!   of vectors; swap in an ANN index behind the same API if that grows)
//! - Typed metadata filtering
//! - FIFO eviction by insertion time once capacity is reached
//!
//! All state lives in process memory and is intentionally non-durable.
//! ============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Typed metadata attached to each document. The known fields cover the two
/// call sites (interaction memory and story matching); anything else goes in
/// the explicit `extra` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Exact-match conjunction over metadata fields. `Some` fields must match;
/// `tag` matches when the document's tag list contains the value.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub child_id: Option<String>,
    pub title: Option<String>,
    pub child_age: Option<u32>,
    pub theme: Option<String>,
    pub tag: Option<String>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl MetadataFilter {
    /// Filter documents belonging to one child.
    pub fn for_child(child_id: impl Into<String>) -> Self {
        Self {
            child_id: Some(child_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, meta: &DocMetadata) -> bool {
        if let Some(child_id) = &self.child_id {
            if meta.child_id.as_deref() != Some(child_id.as_str()) {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if meta.title.as_deref() != Some(title.as_str()) {
                return false;
            }
        }
        if let Some(age) = self.child_age {
            if meta.child_age != Some(age) {
                return false;
            }
        }
        if let Some(theme) = &self.theme {
            if meta.theme.as_deref() != Some(theme.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !meta.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        for (key, value) in &self.extra {
            if meta.extra.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

/// A single embedded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Unique identifier within one store.
    pub id: String,
    /// Source text the embedding was computed from.
    pub text: String,
    /// Embedding vector. Every document in a store shares one dimensionality.
    pub embedding: Vec<f32>,
    pub metadata: DocMetadata,
    /// Insertion time, unix milliseconds.
    pub timestamp: i64,
}

impl VectorDocument {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: DocMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A search hit with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: VectorDocument,
    pub similarity: f32,
}

/// Store statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreStats {
    pub total_documents: usize,
    pub max_capacity: usize,
    pub utilization_percent: u32,
}

/// Cosine similarity between two vectors. Returns 0.0 when either vector has
/// zero norm. Range is [-1, 1]; callers needing [0, 1] rescale as (s + 1) / 2.
/// Slices must have equal length; the store enforces this at its boundaries.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    (dot / denominator) as f32
}

struct Entry {
    doc: VectorDocument,
    /// Monotonic insertion sequence. Breaks eviction and sort ties
    /// deterministically when timestamps collide.
    seq: u64,
}

struct Inner {
    docs: HashMap<String, Entry>,
    next_seq: u64,
    /// Dimensionality fixed by the first inserted document.
    dim: Option<usize>,
}

/// Bounded in-memory vector store. Interior locking makes a shared `Arc`
/// instance safe to mutate from many tasks; no lock is held across an await.
pub struct VectorStore {
    inner: RwLock<Inner>,
    max_documents: usize,
}

impl VectorStore {
    /// Create a store with a fixed capacity.
    pub fn new(max_documents: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                docs: HashMap::new(),
                next_seq: 0,
                dim: None,
            }),
            max_documents,
        }
    }

    /// Insert or overwrite a document by id. When the store is full the
    /// oldest-inserted document is evicted first (FIFO, not LRU).
    pub fn add(&self, doc: VectorDocument) -> Result<(), CoreError> {
        if doc.embedding.is_empty() {
            return Err(CoreError::Validation(format!(
                "document {} has an empty embedding",
                doc.id
            )));
        }

        let mut inner = self.inner.write();

        match inner.dim {
            None => inner.dim = Some(doc.embedding.len()),
            Some(dim) if dim != doc.embedding.len() => {
                return Err(CoreError::DimensionMismatch {
                    expected: dim,
                    got: doc.embedding.len(),
                });
            }
            Some(_) => {}
        }

        // Overwriting an existing id does not change the count, so only
        // evict when a genuinely new document would exceed capacity.
        if !inner.docs.contains_key(&doc.id) && inner.docs.len() >= self.max_documents {
            if let Some(oldest_id) = oldest_document_id(&inner) {
                inner.docs.remove(&oldest_id);
                debug!(evicted = %oldest_id, "vector store evicted oldest document");
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.docs.insert(doc.id.clone(), Entry { doc, seq });
        Ok(())
    }

    /// Insert multiple documents, stopping at the first error.
    pub fn add_batch(&self, docs: Vec<VectorDocument>) -> Result<(), CoreError> {
        for doc in docs {
            self.add(doc)?;
        }
        Ok(())
    }

    /// Brute-force cosine similarity search. Returns up to `top_k` documents
    /// with similarity >= `min_similarity`, sorted descending; ties keep
    /// insertion order.
    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>, CoreError> {
        let inner = self.inner.read();

        if let Some(dim) = inner.dim {
            if dim != query_embedding.len() {
                return Err(CoreError::DimensionMismatch {
                    expected: dim,
                    got: query_embedding.len(),
                });
            }
        }

        // Score in insertion order so the stable sort below yields a
        // deterministic ranking for equal similarities.
        let mut entries: Vec<&Entry> = inner.docs.values().collect();
        entries.sort_by_key(|e| e.seq);

        let mut results: Vec<SearchResult> = entries
            .into_iter()
            .filter_map(|entry| {
                let similarity = cosine_similarity(query_embedding, &entry.doc.embedding);
                (similarity >= min_similarity).then(|| SearchResult {
                    document: entry.doc.clone(),
                    similarity,
                })
            })
            .collect();

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(top_k);
        Ok(results)
    }

    /// Exact-match conjunction over metadata fields; no similarity scoring.
    /// Results keep insertion order.
    pub fn search_by_metadata(&self, filter: &MetadataFilter, top_k: usize) -> Vec<VectorDocument> {
        let inner = self.inner.read();

        let mut entries: Vec<&Entry> = inner
            .docs
            .values()
            .filter(|e| filter.matches(&e.doc.metadata))
            .collect();
        entries.sort_by_key(|e| e.seq);

        entries
            .into_iter()
            .take(top_k)
            .map(|e| e.doc.clone())
            .collect()
    }

    /// Get a document by id.
    pub fn get(&self, id: &str) -> Option<VectorDocument> {
        self.inner.read().docs.get(id).map(|e| e.doc.clone())
    }

    /// Delete a document by id. Returns true when something was removed.
    pub fn delete(&self, id: &str) -> bool {
        self.inner.write().docs.remove(id).is_some()
    }

    /// Remove every document.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.docs.clear();
        inner.dim = None;
    }

    /// Current document count.
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size, capacity and utilization for monitoring.
    pub fn stats(&self) -> VectorStoreStats {
        let size = self.len();
        let utilization = if self.max_documents == 0 {
            0.0
        } else {
            size as f64 / self.max_documents as f64 * 100.0
        };
        VectorStoreStats {
            total_documents: size,
            max_capacity: self.max_documents,
            utilization_percent: utilization.round() as u32,
        }
    }
}

fn oldest_document_id(inner: &Inner) -> Option<String> {
    inner
        .docs
        .values()
        .min_by_key(|e| (e.doc.timestamp, e.seq))
        .map(|e| e.doc.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn doc(id: &str, embedding: Vec<f32>) -> VectorDocument {
        VectorDocument::new(id, format!("text for {id}"), embedding, DocMetadata::default())
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.3, 0.5, 0.2];
        assert_relative_eq!(cosine_similarity(&v, &v), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_symmetry() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-4.0, 0.5, 2.0];
        assert_relative_eq!(
            cosine_similarity(&a, &b),
            cosine_similarity(&b, &a),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert_relative_eq!(cosine_similarity(&a, &b), -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let store = VectorStore::new(3);
        for i in 0..5 {
            let mut d = doc(&format!("doc-{i}"), vec![1.0, 0.0]);
            // Force distinct timestamps so eviction order is unambiguous.
            d.timestamp = i;
            store.add(d).unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(store.get("doc-0").is_none());
        assert!(store.get("doc-1").is_none());
        assert!(store.get("doc-2").is_some());
        assert!(store.get("doc-3").is_some());
        assert!(store.get("doc-4").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let store = VectorStore::new(2);
        store.add(doc("a", vec![1.0, 0.0])).unwrap();
        store.add(doc("b", vec![0.0, 1.0])).unwrap();
        store.add(doc("a", vec![0.5, 0.5])).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("b").is_some());
        assert_relative_eq!(store.get("a").unwrap().embedding[0], 0.5);
    }

    #[test]
    fn test_dimension_mismatch_on_add() {
        let store = VectorStore::new(10);
        store.add(doc("a", vec![1.0, 0.0, 0.0])).unwrap();

        let err = store.add(doc("b", vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch { expected: 3, got: 2 }
        ));
    }

    #[test]
    fn test_dimension_mismatch_on_search() {
        let store = VectorStore::new(10);
        store.add(doc("a", vec![1.0, 0.0, 0.0])).unwrap();

        let err = store.search(&[1.0, 0.0], 5, 0.0).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let store = VectorStore::new(10);
        let err = store.add(doc("a", vec![])).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_search_ranking_and_floor() {
        let store = VectorStore::new(10);
        store.add(doc("east", vec![1.0, 0.0])).unwrap();
        store.add(doc("north", vec![0.0, 1.0])).unwrap();
        store.add(doc("northeast", vec![1.0, 1.0])).unwrap();

        let results = store.search(&[1.0, 0.0], 10, 0.5).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        // "north" is orthogonal (similarity 0) and falls below the floor.
        assert_eq!(ids, vec!["east", "northeast"]);
        assert_relative_eq!(results[0].similarity, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_search_top_k_limit() {
        let store = VectorStore::new(10);
        for i in 0..6 {
            store.add(doc(&format!("d{i}"), vec![1.0, i as f32 * 0.1])).unwrap();
        }
        let results = store.search(&[1.0, 0.0], 3, -1.0).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_empty_store() {
        let store = VectorStore::new(10);
        let results = store.search(&[1.0, 0.0], 5, 0.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_metadata_filter_conjunction() {
        let store = VectorStore::new(10);

        let mut d1 = doc("s1", vec![1.0, 0.0]);
        d1.metadata.theme = Some("hospitality".to_string());
        d1.metadata.child_age = Some(6);
        store.add(d1).unwrap();

        let mut d2 = doc("s2", vec![0.0, 1.0]);
        d2.metadata.theme = Some("hospitality".to_string());
        d2.metadata.child_age = Some(8);
        store.add(d2).unwrap();

        let filter = MetadataFilter {
            theme: Some("hospitality".to_string()),
            child_age: Some(6),
            ..MetadataFilter::default()
        };
        let results = store.search_by_metadata(&filter, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "s1");
    }

    #[test]
    fn test_metadata_filter_by_tag() {
        let store = VectorStore::new(10);
        let mut d = doc("s1", vec![1.0, 0.0]);
        d.metadata.tags = vec!["kindness".to_string(), "sharing".to_string()];
        store.add(d).unwrap();

        let filter = MetadataFilter {
            tag: Some("sharing".to_string()),
            ..MetadataFilter::default()
        };
        assert_eq!(store.search_by_metadata(&filter, 10).len(), 1);

        let filter = MetadataFilter {
            tag: Some("bravery".to_string()),
            ..MetadataFilter::default()
        };
        assert!(store.search_by_metadata(&filter, 10).is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = VectorStore::new(10);
        store.add(doc("a", vec![1.0])).unwrap();
        store.add(doc("b", vec![2.0])).unwrap();

        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
        // Dimensionality resets with the contents.
        store.add(doc("c", vec![1.0, 2.0])).unwrap();
    }

    #[test]
    fn test_stats() {
        let store = VectorStore::new(4);
        store.add(doc("a", vec![1.0])).unwrap();
        store.add(doc("b", vec![2.0])).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.max_capacity, 4);
        assert_eq!(stats.utilization_percent, 50);
    }
}
