//! Schema Embedder
//!
//! Embeds schema documents and query text. The API-backed embedder talks to
//! an OpenAI-compatible embeddings endpoint; the hash embedder is a
//! deterministic local fallback for offline deployments and tests.

use crate::error::{InsightError, Result};
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using an OpenAI-compatible embeddings API.
pub struct ApiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl ApiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Schema(format!("Embedding API call failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(InsightError::Schema(format!(
                "Embedding API returned HTTP {}",
                response.status()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InsightError::Schema(format!("Failed to parse embedding response: {}", e)))?;

        let values = response_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| InsightError::Schema("No embedding in response".to_string()))?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }
}

/// Deterministic bag-of-tokens embedder.
///
/// Each token is hashed into a fixed-size bucket space and the resulting
/// vector is L2-normalized. Token overlap between a query and a schema
/// document therefore translates into cosine similarity.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(token)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::vector_store::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("total revenue by month").await.unwrap();
        let b = embedder.embed("total revenue by month").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_token_overlap_scores_higher() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("orders revenue").await.unwrap();
        let close = embedder.embed("orders order_date revenue amount").await.unwrap();
        let far = embedder.embed("employees salary department").await.unwrap();
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }
}
