//! Execution Module
//!
//! - `DataStore` trait for the relational backend
//! - `QueryExecutor` adapter that never raises and bounds every call
//! - SQLite backend with catalog introspection

pub mod engine;
pub mod result;
pub mod sqlite_engine;

pub use engine::*;
pub use result::*;
pub use sqlite_engine::*;
