//! Schema Catalog
//!
//! Canonical table definitions for the database the pipeline answers questions
//! about, plus the text used to rank and render them.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub sample_values: Vec<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            sample_values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            description: None,
            columns,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Text the relevance ranker scores this table by
    pub fn search_text(&self) -> String {
        let columns: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let mut parts = vec![format!("Table: {}", self.name)];
        if let Some(ref description) = self.description {
            parts.push(format!("Description: {}", description));
        }
        parts.push(format!("Columns: {}", columns.join(", ")));
        parts.join(". ")
    }

    /// CREATE TABLE style rendering for prompts
    pub fn to_ddl(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref description) = self.description {
            lines.push(format!("-- {}", description));
        }
        lines.push(format!("CREATE TABLE {} (", self.name));
        let column_lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.sample_values.is_empty() {
                    format!("    {} {}", c.name, c.data_type)
                } else {
                    format!(
                        "    {} {} -- e.g. {}",
                        c.name,
                        c.data_type,
                        c.sample_values.join(", ")
                    )
                }
            })
            .collect();
        lines.push(column_lines.join(",\n"));
        lines.push(");".to_string());
        lines.join("\n")
    }
}

/// Full set of tables, in canonical order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// One line per table, used by the classifier and clarification prompts
    pub fn summary(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let columns: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
                match t.description {
                    Some(ref d) => format!("- {}({}): {}", t.name, columns.join(", "), d),
                    None => format!("- {}({})", t.name, columns.join(", ")),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Merge table descriptions by name; unknown names are ignored
    pub fn apply_descriptions(&mut self, descriptions: &HashMap<String, String>) {
        for table in &mut self.tables {
            if let Some(description) = descriptions.get(&table.name) {
                table.description = Some(description.clone());
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Schema(format!("Invalid catalog file {}: {}", path.display(), e))
        })
    }
}

/// Load a `{"table": "description"}` JSON file
pub fn load_descriptions(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        PipelineError::Schema(format!("Invalid descriptions file {}: {}", path.display(), e))
    })
}

/// Selected tables for one question. Computed once and reused for every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContext {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaContext {
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(|t| t.to_ddl())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
