//! Configuration snapshots for run provenance.
//!
//! A snapshot captures the exact property set a run started with, plus a
//! SHA-256 fingerprint so two runs can be compared without diffing every
//! key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::ResolvedConfig;
use crate::Properties;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Where the configuration file was found (`cli`, `env`, `xdg`, `defaults`).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    /// Hex SHA-256 over the canonical JSON of `properties`.
    pub fingerprint: String,
    pub captured_at: String,
    pub properties: Properties,
}

impl ConfigSnapshot {
    pub fn capture(resolved: &ResolvedConfig) -> Self {
        Self {
            source: resolved.paths.source.to_string(),
            config_file: resolved
                .paths
                .config_file
                .as_ref()
                .map(|p| p.display().to_string()),
            fingerprint: fingerprint(&resolved.properties),
            captured_at: chrono::Utc::now().to_rfc3339(),
            properties: resolved.properties.clone(),
        }
    }
}

/// Compute the fingerprint of a property set.
pub fn fingerprint(props: &Properties) -> String {
    // BTreeMap-backed, so serialization order is stable.
    let json = serde_json::to_string(props).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}
