//! Contracts of the external collaborators.
//!
//! - `llm`: language model used for SQL generation and result summaries
//! - `warehouse`: tabular warehouse that executes read-only SQL

pub mod llm;
pub mod warehouse;

pub use llm::*;
pub use warehouse::*;
