//! Core types, traits, and error definitions for the PHI query gateway.
//!
//! This crate provides the building blocks shared by the governance layer
//! and the query governor: the request/result data model, the contracts of
//! the two external collaborators (language model and warehouse), the
//! configuration model, and scripted mocks for tests.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
