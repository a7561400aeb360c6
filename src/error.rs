use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Ranking error: {0}")]
    Ranking(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
