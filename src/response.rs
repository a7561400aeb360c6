//! Pipeline Response
//!
//! The only artifact that outlives a pipeline run. It is what the cache stores,
//! so it must not carry caller-specific or time-dependent state.

use crate::execution::result::RowSet;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Query executed and the result was synthesized into an answer
    Answered,
    /// Question was ambiguous; `answer` holds a follow-up question
    Clarification,
    /// Question falls outside the database's domain
    OutOfDomain,
    /// Every generation attempt failed to execute
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    pub is_clarification: bool,

    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,

    /// Projection order of `rows`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<serde_json::Value>>>,

    /// Last execution error when `status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Short trace of what the pipeline did
    #[serde(default)]
    pub reasoning: String,
}

impl Response {
    /// `row_count` is the full result size; `shown` may be a truncated copy
    pub fn answered(
        answer: String,
        sql: String,
        row_count: usize,
        shown: Option<RowSet>,
        reasoning: String,
    ) -> Self {
        let (columns, rows) = match shown {
            Some(set) => (Some(set.columns), Some(set.rows)),
            None => (None, None),
        };
        Self {
            answer,
            sql: Some(sql),
            is_clarification: false,
            status: ResponseStatus::Answered,
            row_count: Some(row_count),
            columns,
            rows,
            error: None,
            reasoning,
        }
    }

    pub fn clarification(question: String, reasoning: String) -> Self {
        Self {
            answer: question,
            sql: None,
            is_clarification: true,
            status: ResponseStatus::Clarification,
            row_count: None,
            columns: None,
            rows: None,
            error: None,
            reasoning,
        }
    }

    pub fn out_of_domain(answer: String, reasoning: String) -> Self {
        Self {
            answer,
            sql: None,
            is_clarification: false,
            status: ResponseStatus::OutOfDomain,
            row_count: None,
            columns: None,
            rows: None,
            error: None,
            reasoning,
        }
    }

    pub fn failed(answer: String, sql: String, error: String, reasoning: String) -> Self {
        Self {
            answer,
            sql: Some(sql),
            is_clarification: false,
            status: ResponseStatus::Failed,
            row_count: None,
            columns: None,
            rows: None,
            error: Some(error),
            reasoning,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == ResponseStatus::Failed
    }

    /// Whether this response may be stored in the response cache
    pub fn is_cacheable(&self) -> bool {
        !self.is_failure()
    }
}
