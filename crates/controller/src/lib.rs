//! Query governor for PHI-bearing warehouse queries.
//!
//! This crate provides:
//! - The per-request state machine ([`Governor`])
//! - Keyword intent routing between schema lookups and data queries
//! - SQL generation prompts and reply parsing
//! - Result rendering

pub mod builder;
pub mod governor;
pub mod intent;
pub mod prompt;
pub mod render;

pub use builder::GovernorBuilder;
pub use governor::{
    GovernedResponse, Governor, GovernorSettings, QueryState, RATE_LIMITED_MESSAGE,
    VALIDATION_FAILED_MESSAGE,
};
pub use intent::{route_intent, Intent};
pub use prompt::extract_sql;
pub use render::{render_schema, ResultRenderer, TextRenderer};
