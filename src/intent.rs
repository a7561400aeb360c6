//! Intent Classifier
//!
//! Decides whether a question can be answered from the catalog, is out of
//! domain, or is too underspecified to attempt.

use crate::error::Result;
use crate::llm::{generate_with_timeout, TextGenerator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Answerable,
    Unanswerable,
    Ambiguous,
}

impl Intent {
    /// Parse raw classifier output. Unrecognized labels fail open to `Answerable`.
    pub fn parse_label(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "ANSWERABLE" => Intent::Answerable,
            "UNANSWERABLE" | "UNAMBIGUOUS_NO" => Intent::Unanswerable,
            "AMBIGUOUS" => Intent::Ambiguous,
            other => {
                warn!("Unrecognized classifier label '{}', treating as ANSWERABLE", other);
                Intent::Answerable
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Answerable => "ANSWERABLE",
            Intent::Unanswerable => "UNANSWERABLE",
            Intent::Ambiguous => "AMBIGUOUS",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn classify(&self, question: &str, catalog_summary: &str) -> Result<Intent> {
        let prompt = build_prompt(question, catalog_summary);
        let raw = generate_with_timeout(self.llm.as_ref(), &prompt, self.timeout).await?;
        let intent = Intent::parse_label(&raw);
        debug!("Classifier output '{}' -> {}", raw.trim(), intent);
        Ok(intent)
    }
}

fn build_prompt(question: &str, catalog_summary: &str) -> String {
    format!(
        r#"You decide whether a question can be answered by a database with these tables:
{}

Reply with exactly one label:
ANSWERABLE - the tables can answer the question as asked.
UNANSWERABLE - the question has nothing to do with this data (e.g. "Write a poem").
AMBIGUOUS - the question is about this data but could mean several different queries (e.g. "Show me the orders" without saying which orders or what about them).

Question: {}
Label:"#,
        catalog_summary, question
    )
}
