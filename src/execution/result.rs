//! Query Result - Rows returned by a data store and the executor's outcome type

use serde::{Deserialize, Serialize};

/// Ordered result set; each row follows `columns` order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of the first `max_rows` rows
    pub fn truncated(&self, max_rows: usize) -> RowSet {
        RowSet {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(max_rows).cloned().collect(),
        }
    }

    /// Pipe-separated text table for prompts
    pub fn to_prompt_table(&self) -> String {
        let mut lines = vec![self.columns.join(" | ")];
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            lines.push(cells.join(" | "));
        }
        lines.join("\n")
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Result of one execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(RowSet),
    /// Backend diagnostic text, verbatim
    Failure(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}
