//! Schema Context Retriever
//!
//! Picks the top-k tables for a question. Output depends only on the catalog,
//! the question and the ranker, so retries of one question see one context.

use crate::error::{PipelineError, Result};
use crate::schema_rag::catalog::{SchemaCatalog, SchemaContext};
use crate::schema_rag::{RankedCandidate, RelevanceRanker};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct SchemaRetriever {
    ranker: Arc<dyn RelevanceRanker>,
    timeout: Duration,
}

impl SchemaRetriever {
    pub fn new(ranker: Arc<dyn RelevanceRanker>, timeout: Duration) -> Self {
        Self { ranker, timeout }
    }

    /// Select at most `k` tables from `catalog`, most relevant first
    pub async fn select_relevant(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        k: usize,
    ) -> Result<SchemaContext> {
        if catalog.len() <= k {
            return Ok(SchemaContext {
                tables: catalog.tables.clone(),
            });
        }

        let documents: Vec<String> = catalog.tables.iter().map(|t| t.search_text()).collect();
        let ranked = match tokio::time::timeout(self.timeout, self.ranker.rank(question, &documents))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::Ranking(format!(
                    "Schema ranking timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let order = top_k_indices(&ranked, catalog.len(), k);
        let tables = order.iter().map(|&i| catalog.tables[i].clone()).collect();
        let context = SchemaContext { tables };
        info!("Retrieved tables: {:?}", context.table_names());
        Ok(context)
    }
}

/// Resolve ranker output into at most `k` distinct catalog positions.
///
/// Scores are re-sorted with catalog order as the tie-break, whatever order the
/// ranker used. Out-of-range and duplicate indices are dropped; tables the ranker
/// left out rank after every scored table.
pub fn top_k_indices(ranked: &[RankedCandidate], catalog_len: usize, k: usize) -> Vec<usize> {
    let mut best: Vec<Option<f32>> = vec![None; catalog_len];
    for candidate in ranked {
        if candidate.index >= catalog_len || candidate.score.is_nan() {
            continue;
        }
        if best[candidate.index].is_none() {
            best[candidate.index] = Some(candidate.score);
        }
    }

    let mut order: Vec<usize> = (0..catalog_len).collect();
    order.sort_by(|&a, &b| match (best[a], best[b]) {
        (Some(sa), Some(sb)) => sb
            .partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(&b),
    });
    order.truncate(k);
    order
}
