//! Core math modules.

pub mod ar;
pub mod difference;
pub mod metrics;
pub mod stats;
