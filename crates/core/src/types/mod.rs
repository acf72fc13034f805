//! Core type definitions for the PHI query gateway.
//!
//! Broken down into submodules by concern:
//! - `request`: inbound requests and requester roles
//! - `query`: statements, cells, rows and results
//! - `schema`: warehouse metadata returned by schema lookups

pub mod query;
pub mod request;
pub mod schema;

pub use query::*;
pub use request::*;
pub use schema::*;
