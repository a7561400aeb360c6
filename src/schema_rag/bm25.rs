//! BM25 Ranker
//!
//! Lexical relevance scoring over table search text. Deterministic and local,
//! so it needs no embedding backend.

use crate::error::{PipelineError, Result};
use crate::schema_rag::{RankedCandidate, RelevanceRanker};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

pub struct Bm25Ranker {
    k1: f32,
    b: f32,
    token_re: Regex,
}

impl Bm25Ranker {
    pub fn new() -> Result<Self> {
        Self::with_params(1.5, 0.75)
    }

    pub fn with_params(k1: f32, b: f32) -> Result<Self> {
        let token_re = Regex::new(r"[A-Za-z0-9]+")
            .map_err(|e| PipelineError::Ranking(format!("Invalid token pattern: {}", e)))?;
        Ok(Self { k1, b, token_re })
    }

    /// Lowercased alphanumeric tokens with a naive plural fold ("orders" -> "order").
    /// Underscores split tokens, so `order_items` contributes "order" and "item".
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.token_re
            .find_iter(text)
            .map(|m| {
                let token = m.as_str().to_lowercase();
                if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
                    token[..token.len() - 1].to_string()
                } else {
                    token
                }
            })
            .collect()
    }

    /// Score every document against the query, in document order
    pub fn score_all(&self, query: &str, documents: &[String]) -> Vec<f32> {
        let docs: Vec<Vec<String>> = documents.iter().map(|d| self.tokenize(d)).collect();
        let n = docs.len() as f32;
        if docs.is_empty() {
            return Vec::new();
        }
        let avg_len = docs.iter().map(|d| d.len()).sum::<usize>() as f32 / n;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let unique: HashSet<&str> = doc.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        // Ordered so the float sum is identical run to run
        let query_terms: BTreeSet<String> = self.tokenize(query).into_iter().collect();

        docs.iter()
            .map(|doc| {
                let len = doc.len() as f32;
                let mut term_freq: HashMap<&str, usize> = HashMap::new();
                for term in doc {
                    *term_freq.entry(term.as_str()).or_insert(0) += 1;
                }
                query_terms
                    .iter()
                    .filter_map(|term| {
                        let tf = *term_freq.get(term.as_str())? as f32;
                        let df = *doc_freq.get(term.as_str())? as f32;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = if avg_len > 0.0 {
                            1.0 - self.b + self.b * len / avg_len
                        } else {
                            1.0
                        };
                        Some(idf * tf * (self.k1 + 1.0) / (tf + self.k1 * norm))
                    })
                    .sum::<f32>()
            })
            .collect()
    }
}

#[async_trait]
impl RelevanceRanker for Bm25Ranker {
    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<RankedCandidate>> {
        let mut ranked: Vec<RankedCandidate> = self
            .score_all(query, candidates)
            .into_iter()
            .enumerate()
            .map(|(index, score)| RankedCandidate { index, score })
            .collect();
        // Stable sort keeps catalog order among equal scores
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }
}
