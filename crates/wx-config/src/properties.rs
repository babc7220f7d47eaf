//! Immutable key/value configuration snapshots.
//!
//! The orchestrator owns a [`Properties`] snapshot and hands `&Properties`
//! to each stage. A stage never mutates the snapshot; it returns a
//! [`ConfigDelta`] which the orchestrator merges into a new snapshot before
//! the next stage starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ConfigError;

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from key/value pairs. Later pairs win.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style insert, consuming the snapshot.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Fetch a key that must be present and non-empty.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::Missing {
                keys: vec![key.to_string()],
            }),
        }
    }

    /// Fetch several required keys at once, reporting every missing key
    /// together rather than stopping at the first.
    pub fn require_all(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut found = BTreeMap::new();
        let mut missing = Vec::new();
        for key in keys {
            match self.require(key) {
                Ok(v) => {
                    found.insert((*key).to_string(), v.to_string());
                }
                Err(_) => missing.push((*key).to_string()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(ConfigError::Missing { keys: missing })
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" | "" => Ok(false),
                other => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got '{other}'"),
                }),
            },
        }
    }

    pub fn get_u32(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => parse_u32(key, v),
        }
    }

    pub fn require_u32(&self, key: &str) -> Result<u32, ConfigError> {
        parse_u32(key, self.require(key)?)
    }

    /// Comma separated list; empty entries are skipped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Produce a new snapshot with the delta applied.
    pub fn merge(&self, delta: &ConfigDelta) -> Properties {
        let mut values = self.values.clone();
        for (k, v) in &delta.values {
            values.insert(k.clone(), v.clone());
        }
        Properties { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.values {
            writeln!(f, "{k} = {v}")?;
        }
        Ok(())
    }
}

/// Keys a stage derived for the stages after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDelta {
    values: BTreeMap<String, String>,
}

impl ConfigDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Fold another delta in; its values win.
    pub fn extend(&mut self, other: ConfigDelta) {
        self.values.extend(other.values);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

fn parse_u32(key: &str, v: &str) -> Result<u32, ConfigError> {
    v.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("expected a non-negative integer, got '{v}' ({e})"),
    })
}

/// Parse a range spec: `1,2,5`, `1-3` (inclusive) or a single `4`.
/// An empty spec yields an empty list.
pub fn range_spec(key: &str, spec: &str) -> Result<Vec<u32>, ConfigError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    if spec.contains(',') {
        spec.split(',').map(|s| parse_u32(key, s)).collect()
    } else if let Some((start, end)) = spec.split_once('-') {
        let start = parse_u32(key, start)?;
        let end = parse_u32(key, end)?;
        if end < start {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("range {start}-{end} is descending"),
            });
        }
        Ok((start..=end).collect())
    } else {
        Ok(vec![parse_u32(key, spec)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::from_pairs([("a", "1"), ("b", "true"), ("list", "x, y,,z")])
    }

    #[test]
    fn require_reports_missing_key() {
        let err = props().require("nope").unwrap_err();
        match err {
            ConfigError::Missing { keys } => assert_eq!(keys, vec!["nope".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn require_treats_blank_as_missing() {
        let p = Properties::new().with("k", "   ");
        assert!(p.require("k").is_err());
    }

    #[test]
    fn require_all_collects_every_missing_key() {
        let err = props().require_all(&["a", "x", "y"]).unwrap_err();
        match err {
            ConfigError::Missing { keys } => assert_eq!(keys, vec!["x", "y"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn merge_returns_new_snapshot() {
        let base = props();
        let mut delta = ConfigDelta::new();
        delta.set("a", "2").set("c", "3");
        let next = base.merge(&delta);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(next.get("a"), Some("2"));
        assert_eq!(next.get("c"), Some("3"));
    }

    #[test]
    fn bool_parsing() {
        let p = props();
        assert!(p.get_bool("b", false).unwrap());
        assert!(!p.get_bool("missing", false).unwrap());
        assert!(p.get_bool("a", false).unwrap());
        assert!(p.clone().with("bad", "maybe").get_bool("bad", false).is_err());
    }

    #[test]
    fn list_skips_empty_entries() {
        assert_eq!(props().get_list("list"), vec!["x", "y", "z"]);
        assert!(props().get_list("missing").is_empty());
    }

    #[test]
    fn range_spec_forms() {
        assert_eq!(range_spec("p", "1,2").unwrap(), vec![1, 2]);
        assert_eq!(range_spec("p", "1-3").unwrap(), vec![1, 2, 3]);
        assert_eq!(range_spec("p", "4").unwrap(), vec![4]);
        assert!(range_spec("p", "").unwrap().is_empty());
        assert!(range_spec("p", "3-1").is_err());
        assert!(range_spec("p", "a,b").is_err());
    }
}
