//! Error Classifier
//!
//! Labels backend error text for logs and the reasoning trace. The label never
//! changes retry behavior; the verbatim message is what the generator sees.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    SyntaxError,
    InvalidAggregation,
    ConstraintViolation,
    ReadOnly,
    Timeout,
    Other,
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SqlErrorClass::ColumnNotFound => "ColumnNotFound",
            SqlErrorClass::TableNotFound => "TableNotFound",
            SqlErrorClass::AmbiguousColumn => "AmbiguousColumn",
            SqlErrorClass::SyntaxError => "SyntaxError",
            SqlErrorClass::InvalidAggregation => "InvalidAggregation",
            SqlErrorClass::ConstraintViolation => "ConstraintViolation",
            SqlErrorClass::ReadOnly => "ReadOnly",
            SqlErrorClass::Timeout => "Timeout",
            SqlErrorClass::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Classify an execution error message
pub fn classify_error(message: &str) -> SqlErrorClass {
    let msg = message.to_lowercase();

    if msg.contains("ambiguous column") {
        return SqlErrorClass::AmbiguousColumn;
    }
    if msg.contains("no such column") || (msg.contains("column") && msg.contains("does not exist")) {
        return SqlErrorClass::ColumnNotFound;
    }
    if msg.contains("no such table") || (msg.contains("table") && msg.contains("does not exist")) {
        return SqlErrorClass::TableNotFound;
    }
    if msg.contains("syntax error") || msg.contains("incomplete input") {
        return SqlErrorClass::SyntaxError;
    }
    if msg.contains("misuse of aggregate") || msg.contains("aggregate functions are not allowed") {
        return SqlErrorClass::InvalidAggregation;
    }
    if msg.contains("constraint failed") {
        return SqlErrorClass::ConstraintViolation;
    }
    if msg.contains("readonly") || msg.contains("read-only") {
        return SqlErrorClass::ReadOnly;
    }
    if msg.contains("timed out") || msg.contains("timeout") {
        return SqlErrorClass::Timeout;
    }

    SqlErrorClass::Other
}
