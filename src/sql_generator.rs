//! SQL Generator
//!
//! Produces query text from a question and its schema context. On a retry the
//! prompt carries the failed query and the exact backend error so the model
//! corrects its previous attempt instead of starting over.

use crate::error::Result;
use crate::llm::{generate_with_timeout, TextGenerator};
use crate::schema_rag::catalog::SchemaContext;
use std::sync::Arc;
use std::time::Duration;

/// A failed attempt fed back into the next generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorError {
    pub sql: String,
    pub message: String,
}

pub struct SqlGenerator {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaContext,
        prior_error: Option<&PriorError>,
    ) -> Result<String> {
        let prompt = build_prompt(question, schema, prior_error);
        let raw = generate_with_timeout(self.llm.as_ref(), &prompt, self.timeout).await?;
        Ok(clean_sql(&raw))
    }
}

pub fn build_prompt(question: &str, schema: &SchemaContext, prior_error: Option<&PriorError>) -> String {
    let mut parts = Vec::new();

    parts.push("You are an expert SQLite developer.".to_string());
    parts.push(format!("Given the following database schema:\n{}", schema.render()));
    parts.push(
        "Generate a valid SQLite query to answer the user's question.\n\
         When asked for 'Top N' results, use DENSE_RANK() so ties are included, rather than a plain LIMIT.\n\
         Return ONLY the SQL query, no markdown formatting, no backticks."
            .to_string(),
    );

    if let Some(prior) = prior_error {
        parts.push(format!(
            "Your previous query was:\n{}\n\nIt failed with this error:\n{}\n\n\
             Fix that query so it runs and still answers the question. Do not start from scratch.",
            prior.sql, prior.message
        ));
    }

    parts.push(format!("Question: {}", question));
    parts.join("\n\n")
}

/// Strip markdown fences and surrounding whitespace from model output
pub fn clean_sql(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```sql") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```SQL") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    inner.strip_suffix("```").unwrap_or(inner).trim().to_string()
}
