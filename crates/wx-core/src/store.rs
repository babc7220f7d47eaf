//! Sorted wide-column store interface and the in-process implementation.
//!
//! Every table holds rows sorted by key; a row holds cells addressed by
//! `(family, qualifier)`. Callers reach the store through a
//! [`ScopedConnection`], which returns its connection when dropped so every
//! exit path (success, `?`, panic unwinding) releases it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised by a column store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("table {table} has no column family {family}")]
    UnknownFamily { table: String, family: String },

    #[error("connection {0} is not open")]
    ConnectionClosed(u64),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("invalid row filter: {0}")]
    InvalidFilter(#[from] regex::Error),
}

impl From<StoreError> for wx_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound(table) => wx_common::Error::TableNotFound { table },
            other => wx_common::Error::Storage(other.to_string()),
        }
    }
}

/// Typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Double(f64),
    Long(i64),
    Text(String),
}

impl Value {
    /// Numeric view of the cell; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Long(v) => Some(*v as f64),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One cell of a scanned row.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Value,
}

/// A scanned row with its cells in `(family, qualifier)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub cells: Vec<Cell>,
}

impl Row {
    /// First cell with the given qualifier, in any family.
    pub fn get(&self, qualifier: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|c| c.qualifier == qualifier)
            .map(|c| &c.value)
    }
}

/// A single cell write.
#[derive(Debug, Clone, PartialEq)]
pub struct Put {
    pub row: String,
    pub family: String,
    pub qualifier: String,
    pub value: Value,
}

impl Put {
    pub fn new(
        row: impl Into<String>,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            value,
        }
    }
}

/// Row and column restrictions for a scan. Empty means everything.
#[derive(Debug, Clone, Default)]
pub struct ScanSpec {
    /// Rows whose key matches (unanchored search).
    pub row_filter: Option<Regex>,
    /// Rows whose key does not match.
    pub row_exclude: Option<Regex>,
    pub family: Option<String>,
    /// Only these qualifiers are returned; rows left with no cells are skipped.
    pub qualifiers: Option<BTreeSet<String>>,
}

impl ScanSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn rows(mut self, filter: Regex) -> Self {
        self.row_filter = Some(filter);
        self
    }

    pub fn excluding(mut self, filter: Regex) -> Self {
        self.row_exclude = Some(filter);
        self
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn qualifiers<I, S>(mut self, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qualifiers = Some(qualifiers.into_iter().map(Into::into).collect());
        self
    }

    fn accepts_row(&self, key: &str) -> bool {
        self.row_filter.as_ref().map_or(true, |re| re.is_match(key))
            && !self.row_exclude.as_ref().is_some_and(|re| re.is_match(key))
    }

    fn accepts_cell(&self, family: &str, qualifier: &str) -> bool {
        self.family.as_deref().map_or(true, |f| f == family)
            && self
                .qualifiers
                .as_ref()
                .map_or(true, |q| q.contains(qualifier))
    }
}

/// Iterator over scanned rows in key order.
pub type RowScan = std::vec::IntoIter<Row>;

/// Opaque id of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// A sorted wide-column store.
pub trait ColumnStore: Send + Sync {
    fn open_connection(&self) -> Result<ConnectionId, StoreError>;
    fn close_connection(&self, id: ConnectionId);

    fn table_exists(&self, id: ConnectionId, table: &str) -> Result<bool, StoreError>;
    fn create_table(&self, id: ConnectionId, table: &str, family: &str) -> Result<(), StoreError>;
    /// Delete a table; returns whether it existed.
    fn delete_table(&self, id: ConnectionId, table: &str) -> Result<bool, StoreError>;
    fn scan_rows(&self, id: ConnectionId, table: &str, spec: &ScanSpec)
        -> Result<RowScan, StoreError>;
    /// Write cells; returns the number written.
    fn put(&self, id: ConnectionId, table: &str, puts: Vec<Put>) -> Result<usize, StoreError>;
}

// ── Scoped connection ───────────────────────────────────────────────────

/// An open connection that is closed when dropped.
pub struct ScopedConnection {
    store: Arc<dyn ColumnStore>,
    id: ConnectionId,
}

impl ScopedConnection {
    pub fn open(store: Arc<dyn ColumnStore>) -> Result<Self, StoreError> {
        let id = store.open_connection()?;
        trace!(connection = id.0, "connection opened");
        Ok(Self { store, id })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.store.table_exists(self.id, table)
    }

    pub fn create_table(&self, table: &str, family: &str) -> Result<(), StoreError> {
        self.store.create_table(self.id, table, family)
    }

    /// Create the table unless it already exists; returns whether it was created.
    pub fn ensure_table(&self, table: &str, family: &str) -> Result<bool, StoreError> {
        if self.table_exists(table)? {
            return Ok(false);
        }
        match self.create_table(table, family) {
            Ok(()) => Ok(true),
            Err(StoreError::TableExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn delete_table(&self, table: &str) -> Result<bool, StoreError> {
        self.store.delete_table(self.id, table)
    }

    pub fn scan_rows(&self, table: &str, spec: &ScanSpec) -> Result<RowScan, StoreError> {
        self.store.scan_rows(self.id, table, spec)
    }

    pub fn put(&self, table: &str, puts: Vec<Put>) -> Result<usize, StoreError> {
        self.store.put(self.id, table, puts)
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.store.close_connection(self.id);
        trace!(connection = self.id.0, "connection closed");
    }
}

// ── In-memory store ─────────────────────────────────────────────────────

type CellMap = BTreeMap<(String, String), Value>;

#[derive(Debug, Default)]
struct Table {
    families: BTreeSet<String>,
    rows: BTreeMap<String, CellMap>,
}

/// Thread-safe in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Table>>,
    open: RwLock<BTreeSet<u64>>,
    next_id: AtomicU64,
    opened_total: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Connections opened over the store's lifetime.
    pub fn connections_opened(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    /// Names of every table, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_open(&self, id: ConnectionId) -> Result<(), StoreError> {
        let open = self.open.read().map_err(|_| StoreError::Poisoned)?;
        if open.contains(&id.0) {
            Ok(())
        } else {
            Err(StoreError::ConnectionClosed(id.0))
        }
    }
}

impl ColumnStore for MemoryStore {
    fn open_connection(&self) -> Result<ConnectionId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.write().map_err(|_| StoreError::Poisoned)?.insert(id);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionId(id))
    }

    fn close_connection(&self, id: ConnectionId) {
        if let Ok(mut open) = self.open.write() {
            open.remove(&id.0);
        }
    }

    fn table_exists(&self, id: ConnectionId, table: &str) -> Result<bool, StoreError> {
        self.check_open(id)?;
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.contains_key(table))
    }

    fn create_table(&self, id: ConnectionId, table: &str, family: &str) -> Result<(), StoreError> {
        self.check_open(id)?;
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        if tables.contains_key(table) {
            return Err(StoreError::TableExists(table.to_string()));
        }
        let mut t = Table::default();
        t.families.insert(family.to_string());
        tables.insert(table.to_string(), t);
        debug!(table, family, "table created");
        Ok(())
    }

    fn delete_table(&self, id: ConnectionId, table: &str) -> Result<bool, StoreError> {
        self.check_open(id)?;
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let existed = tables.remove(table).is_some();
        if existed {
            debug!(table, "table deleted");
        }
        Ok(existed)
    }

    fn scan_rows(
        &self,
        id: ConnectionId,
        table: &str,
        spec: &ScanSpec,
    ) -> Result<RowScan, StoreError> {
        self.check_open(id)?;
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let rows: Vec<Row> = t
            .rows
            .iter()
            .filter(|(key, _)| spec.accepts_row(key))
            .filter_map(|(key, cells)| {
                let cells: Vec<Cell> = cells
                    .iter()
                    .filter(|((family, qualifier), _)| spec.accepts_cell(family, qualifier))
                    .map(|((family, qualifier), value)| Cell {
                        family: family.clone(),
                        qualifier: qualifier.clone(),
                        value: value.clone(),
                    })
                    .collect();
                (!cells.is_empty()).then(|| Row {
                    key: key.clone(),
                    cells,
                })
            })
            .collect();
        Ok(rows.into_iter())
    }

    fn put(&self, id: ConnectionId, table: &str, puts: Vec<Put>) -> Result<usize, StoreError> {
        self.check_open(id)?;
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        if let Some(bad) = puts.iter().find(|p| !t.families.contains(&p.family)) {
            return Err(StoreError::UnknownFamily {
                table: table.to_string(),
                family: bad.family.clone(),
            });
        }
        let written = puts.len();
        for p in puts {
            t.rows
                .entry(p.row)
                .or_default()
                .insert((p.family, p.qualifier), p.value);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn scoped_connection_closes_on_drop() {
        let s = store();
        {
            let conn = ScopedConnection::open(s.clone()).unwrap();
            conn.create_table("t", "data").unwrap();
            assert_eq!(s.open_connections(), 1);
        }
        assert_eq!(s.open_connections(), 0);
        assert_eq!(s.connections_opened(), 1);
    }

    #[test]
    fn closed_connection_rejected() {
        let s = store();
        let id = s.open_connection().unwrap();
        s.close_connection(id);
        assert!(matches!(
            s.table_exists(id, "t"),
            Err(StoreError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn put_and_scan_with_filters() {
        let s = store();
        let conn = ScopedConnection::open(s.clone()).unwrap();
        conn.create_table("t", "data").unwrap();
        conn.put(
            "t",
            vec![
                Put::new("b", "data", "x", Value::Double(2.0)),
                Put::new("a", "data", "x", Value::Double(1.0)),
                Put::new("a", "data", "y", Value::Long(7)),
                Put::new("#stats#x", "data", "mean@a", Value::Double(0.5)),
            ],
        )
        .unwrap();

        let keys: Vec<String> = conn
            .scan_rows("t", &ScanSpec::all())
            .unwrap()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["#stats#x", "a", "b"]);

        let only_y: Vec<Row> = conn
            .scan_rows("t", &ScanSpec::all().qualifiers(["y"]))
            .unwrap()
            .collect();
        assert_eq!(only_y.len(), 1);
        assert_eq!(only_y[0].get("y"), Some(&Value::Long(7)));

        let data_rows = conn
            .scan_rows(
                "t",
                &ScanSpec::all().excluding(Regex::new("^#stats#").unwrap()),
            )
            .unwrap()
            .count();
        assert_eq!(data_rows, 2);
    }

    #[test]
    fn unknown_family_and_missing_table() {
        let s = store();
        let conn = ScopedConnection::open(s.clone()).unwrap();
        conn.create_table("t", "data").unwrap();
        assert!(matches!(
            conn.put("t", vec![Put::new("a", "meta", "x", Value::Long(1))]),
            Err(StoreError::UnknownFamily { .. })
        ));
        assert!(matches!(
            conn.put("missing", vec![]),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(!conn.delete_table("missing").unwrap());
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let s = store();
        let conn = ScopedConnection::open(s.clone()).unwrap();
        assert!(conn.ensure_table("t", "data").unwrap());
        assert!(!conn.ensure_table("t", "data").unwrap());
        assert!(matches!(
            conn.create_table("t", "data"),
            Err(StoreError::TableExists(_))
        ));
    }

    #[test]
    fn value_numeric_view() {
        assert_eq!(Value::Text(" 2.5 ".into()).as_f64(), Some(2.5));
        assert_eq!(Value::Long(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("n/a".into()).as_f64(), None);
    }
}
