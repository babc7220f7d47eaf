//! Series and run identity types.
//!
//! A series is identified by the stable id of the physical entity that
//! produced it (a weather station, a sensor). A pipeline run gets a fresh
//! `RunId` so extracted results can be traced back to the run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that may not appear in a series id because they delimit
/// row keys and stats qualifiers.
pub const RESERVED_SERIES_CHARS: [char; 2] = ['/', '@'];

/// Series identifier wrapper.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub String);

impl SeriesId {
    /// Parse and validate a series id.
    ///
    /// Empty ids and ids containing a reserved delimiter are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.contains(RESERVED_SERIES_CHARS) {
            None
        } else {
            Some(SeriesId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run ID for tracking pipeline runs.
///
/// Format: `run-<date>-<time>-<random>`
/// Example: `run-20260115-143022-abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let random: String = uuid::Uuid::new_v4()
            .to_string()
            .chars()
            .take(6)
            .collect();
        RunId(format!("run-{}-{}", now.format("%Y%m%d-%H%M%S"), random))
    }

    /// Parse an existing run ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("run-") && s.len() > 19 {
            Some(RunId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
