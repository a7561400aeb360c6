//! Schema Embedder
//!
//! Embedding-based relevance ranking using an OpenAI-compatible embeddings API.

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use crate::schema_rag::{RankedCandidate, RelevanceRanker};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using the `/embeddings` endpoint
pub struct SchemaEmbedder {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String, // e.g., "text-embedding-3-small"
}

impl SchemaEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.embedding_model.clone(),
        )
    }
}

#[async_trait]
impl TextEmbedder for SchemaEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Ranking(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::Ranking(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::Ranking(format!("Failed to parse embedding response: {}", e))
        })?;

        parse_embedding(&response_json)
    }
}

fn parse_embedding(response_json: &serde_json::Value) -> Result<Embedding> {
    let data = response_json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| PipelineError::Ranking("No embedding data in response".to_string()))?;

    let embedding: Vec<f32> = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| PipelineError::Ranking("No embedding vector in response".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    Ok(embedding)
}

/// Ranks candidates by cosine similarity to the query embedding.
/// Candidate embeddings are memoized by text since the catalog rarely changes.
pub struct EmbeddingRanker {
    embedder: Arc<dyn TextEmbedder>,
    memo: DashMap<String, Embedding>,
}

impl EmbeddingRanker {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            embedder,
            memo: DashMap::new(),
        }
    }

    async fn candidate_embedding(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.memo.get(text) {
            return Ok(hit.value().clone());
        }
        let embedding = self.embedder.embed_text(text).await?;
        self.memo.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}

#[async_trait]
impl RelevanceRanker for EmbeddingRanker {
    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<RankedCandidate>> {
        let query_embedding = self.embedder.embed_text(query).await?;

        let mut ranked = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let embedding = self.candidate_embedding(candidate).await?;
            ranked.push(RankedCandidate {
                index,
                score: cosine_similarity(&query_embedding, &embedding),
            });
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
