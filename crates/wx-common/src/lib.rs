//! Weather series pipeline common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the wx crates:
//! - Series and run identity types
//! - Schema versioning for persisted outputs
//! - The workspace error type with stable error codes
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;
pub mod schema;

pub use error::{Error, Result};
pub use id::{RunId, SeriesId};
pub use output::OutputFormat;
pub use schema::SCHEMA_VERSION;
