pub mod bm25;
pub mod catalog;
pub mod embedder;
pub mod retriever;

pub use bm25::*;
pub use catalog::*;
pub use embedder::*;
pub use retriever::*;

use crate::error::Result;
use async_trait::async_trait;

/// Candidate position in the ranked input plus its relevance score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub index: usize,
    pub score: f32,
}

/// Relevance-ranking capability: order candidates by descending relevance to a query
#[async_trait]
pub trait RelevanceRanker: Send + Sync {
    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<RankedCandidate>>;
}
