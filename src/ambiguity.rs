use crate::error::Result;
use crate::llm::{generate_with_timeout, TextGenerator};
use std::sync::Arc;
use std::time::Duration;

/// Turns an underspecified question into a single follow-up question for the user
pub struct ClarificationComposer {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl ClarificationComposer {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn clarify(&self, question: &str, catalog_summary: &str) -> Result<String> {
        let prompt = format!(
            r#"A user asked a question about a database that is too vague to turn into one query.

Tables:
{}

Question: "{}"

Ask the user ONE short clarifying question that would let you pick a single query
(for example which time period, which metric, or which subset they mean).
Return only the clarifying question."#,
            catalog_summary, question
        );
        let reply = generate_with_timeout(self.llm.as_ref(), &prompt, self.timeout).await?;
        Ok(reply.trim().to_string())
    }
}
