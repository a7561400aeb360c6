//! Answer Synthesizer
//!
//! Turns the final query and its rows into a natural-language answer. Only the
//! first `max_prompt_rows` rows reach the prompt.

use crate::error::Result;
use crate::execution::result::RowSet;
use crate::llm::{generate_with_timeout, TextGenerator};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct AnswerSynthesizer {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
    max_prompt_rows: usize,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration, max_prompt_rows: usize) -> Self {
        Self {
            llm,
            timeout,
            max_prompt_rows,
        }
    }

    pub async fn synthesize(&self, question: &str, sql: &str, rows: &RowSet) -> Result<String> {
        let prompt = build_prompt(question, sql, rows, self.max_prompt_rows);
        debug!("Synthesizing answer from {} rows", rows.row_count());
        let answer = generate_with_timeout(self.llm.as_ref(), &prompt, self.timeout).await?;
        Ok(answer.trim().to_string())
    }
}

pub fn build_prompt(question: &str, sql: &str, rows: &RowSet, max_prompt_rows: usize) -> String {
    let shown = rows.truncated(max_prompt_rows);
    let mut result = if shown.is_empty() {
        "(no rows)".to_string()
    } else {
        shown.to_prompt_table()
    };
    if rows.row_count() > shown.row_count() {
        result.push_str(&format!(
            "\n(showing the first {} of {} rows)",
            shown.row_count(),
            rows.row_count()
        ));
    }

    format!(
        "User Question: {}\n\
         SQL Query: {}\n\
         SQL Result:\n{}\n\n\
         Please provide a concise natural language answer based on the result.\n\
         Format any monetary values with the appropriate currency symbol (e.g., $).",
        question, sql, result
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  Total revenue is $35.75.\n".to_string())
        }
    }

    fn many_rows(n: i64) -> RowSet {
        RowSet::new(
            vec!["id".to_string()],
            (0..n).map(|i| vec![json!(i)]).collect(),
        )
    }

    #[test]
    fn test_prompt_truncates_and_notes_it() {
        let prompt = build_prompt("List order ids", "SELECT id FROM orders", &many_rows(10), 3);
        assert!(prompt.contains("showing the first 3 of 10 rows"));
        assert!(!prompt.contains("\n9"));
        assert!(prompt.contains("currency symbol"));
    }

    #[test]
    fn test_prompt_without_truncation_has_no_note() {
        let prompt = build_prompt("List order ids", "SELECT id FROM orders", &many_rows(2), 50);
        assert!(!prompt.contains("showing the first"));
    }

    #[test]
    fn test_empty_result_is_stated() {
        let prompt = build_prompt("q", "SELECT 1 WHERE 0", &RowSet::new(vec!["x".to_string()], vec![]), 50);
        assert!(prompt.contains("(no rows)"));
    }

    #[tokio::test]
    async fn test_synthesize_trims_reply() {
        let llm = Arc::new(RecordingLlm {
            prompts: Mutex::new(Vec::new()),
        });
        let synthesizer = AnswerSynthesizer::new(llm.clone(), Duration::from_secs(1), 50);
        let rows = RowSet::new(vec!["total".to_string()], vec![vec![json!(35.75)]]);
        let answer = synthesizer
            .synthesize("What is total revenue?", "SELECT SUM(amount) FROM orders", &rows)
            .await
            .unwrap();
        assert_eq!(answer, "Total revenue is $35.75.");
        assert!(llm.prompts.lock().unwrap()[0].contains("35.75"));
    }
}
