//! Column type maps.
//!
//! The lag and ARIMA stages tell the mapper which column to read and how to
//! interpret its cells. The map travels through the configuration as a
//! string: `"<column>:<type>[,<column>:<type>...]"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ConfigError;

/// Scalar type of a column's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Double,
    Long,
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Some(DataType::String),
            "double" => Some(DataType::Double),
            "long" => Some(DataType::Long),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Double => write!(f, "double"),
            DataType::Long => write!(f, "long"),
        }
    }
}

/// Column name → cell type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMap {
    columns: BTreeMap<String, DataType>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a single column entry.
    pub fn encode(data_type: DataType, column: &str) -> String {
        format!("{column}:{data_type}")
    }

    pub fn insert(&mut self, column: impl Into<String>, data_type: DataType) {
        self.columns.insert(column.into(), data_type);
    }

    pub fn get(&self, column: &str) -> Option<DataType> {
        self.columns.get(column).copied()
    }

    pub fn decode(key: &str, encoded: &str) -> Result<Self, ConfigError> {
        let mut map = TypeMap::new();
        for entry in encoded.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (column, ty) = entry.rsplit_once(':').ok_or_else(|| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("type map entry '{entry}' has no ':'"),
            })?;
            let data_type = DataType::parse(ty).ok_or_else(|| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("unknown data type '{ty}'"),
            })?;
            map.insert(column, data_type);
        }
        Ok(map)
    }
}

impl fmt::Display for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .columns
            .iter()
            .map(|(c, t)| TypeMap::encode(*t, c))
            .collect();
        write!(f, "{}", entries.join(","))
    }
}
