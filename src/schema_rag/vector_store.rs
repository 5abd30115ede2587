//! Vector Store
//!
//! In-memory vector store over embedded documents. Durable storage of the
//! indexed schemas lives with the schema index, which rebuilds this store
//! from its snapshot at load time.

use std::collections::BTreeMap;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub embedding: Embedding,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
}

/// Vector store keyed by document id.
pub struct VectorStore {
    documents: BTreeMap<String, Document>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            documents: BTreeMap::new(),
        }
    }

    /// Insert or replace a document. Indexing the same id twice leaves the
    /// store equivalent to indexing it once.
    pub fn upsert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Search by cosine similarity, ties broken by document id.
    pub fn search(&self, query_embedding: &Embedding, top_k: usize) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = self
            .documents
            .values()
            .map(|doc| SearchResult {
                id: doc.id.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);
        results
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity between two embeddings, accumulated in a single pass.
/// Mismatched dimensions and degenerate (zero) vectors score 0.0 so they
/// sort behind every real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denominator = (mag_a * mag_b).sqrt();
    if denominator <= f32::EPSILON {
        return 0.0;
    }
    dot / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_schema_embeddings_score_one() {
        // Shaped like a normalized bag-of-tokens embedding for one table.
        let orders = vec![0.6, 0.0, 0.8, 0.0];
        assert!((cosine_similarity(&orders, &orders) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_token_buckets_score_zero() {
        // Two tables whose document tokens hash into disjoint buckets.
        let orders = vec![0.6, 0.0, 0.8, 0.0];
        let customers = vec![0.0, 0.5, 0.0, 0.5];
        assert!(cosine_similarity(&orders, &customers).abs() < 1e-6);
    }

    #[test]
    fn test_shared_tokens_rank_above_unrelated() {
        // A query mentioning "orders" and "revenue" shares one bucket with
        // the orders table and none with the employees table.
        let query = vec![0.7, 0.7, 0.0];
        let orders = vec![1.0, 0.0, 0.0];
        let employees = vec![0.0, 0.0, 1.0];
        assert!(cosine_similarity(&query, &orders) > cosine_similarity(&query, &employees));
    }

    #[test]
    fn test_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[0.3, 0.4], &[0.3, 0.4, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.3, 0.4]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = VectorStore::new();
        let doc = Document {
            id: "orders".to_string(),
            text: "orders table".to_string(),
            embedding: vec![1.0, 0.0],
        };
        store.upsert(doc.clone());
        store.upsert(doc);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_search_ties_break_by_id() {
        let mut store = VectorStore::new();
        for id in ["zeta", "alpha"] {
            store.upsert(Document {
                id: id.to_string(),
                text: id.to_string(),
                embedding: vec![1.0, 0.0],
            });
        }
        let results = store.search(&vec![1.0, 0.0], 2);
        assert_eq!(results[0].id, "alpha");
        assert_eq!(results[1].id, "zeta");
    }
}
