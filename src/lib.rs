pub mod ambiguity;
pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod response;
pub mod schema_rag;
pub mod seed;
pub mod sql_generator;
pub mod synthesizer;

pub use config::{LlmConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{QueryPipeline, QueryPipelineBuilder};
pub use response::{Response, ResponseStatus};
