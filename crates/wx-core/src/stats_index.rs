//! Stage stats index: tag naming and target-column resolution.
//!
//! Stages name their output columns by joining tokens with `_`
//! (`temp_step_1`, `temp_step_1_lag_0`) and persist one stats row per column
//! under `#stats#<tag>`. A later stage does not know the exact name it
//! needs; it knows a token pattern (`[*, "1", "lag", "0"]`) and looks the
//! name up among the stats rows of the previous stage's table.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::{ScanSpec, ScopedConnection, StoreError, Value};

/// Marks a stats row; the rest of the row key is the column tag.
pub const STATS_ROW_MARK: &str = "#stats#";
/// Joins tag tokens.
pub const TAG_SEPARATOR: &str = "_";
/// Separates the statistic from the series id in a stats qualifier.
pub const STAT_QUALIFIER_SEPARATOR: char = '@';

/// Join tokens into a tag.
pub fn build_tag<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(TAG_SEPARATOR)
}

/// Stats row key for a column tag.
pub fn stats_row_key(tag: &str) -> String {
    format!("{STATS_ROW_MARK}{tag}")
}

/// Stats qualifier for one statistic of one series.
pub fn stat_qualifier(stat: StatKind, series: &str) -> String {
    format!("{}{}{}", stat.as_str(), STAT_QUALIFIER_SEPARATOR, series)
}

/// Statistics a stage records per column and series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Mean,
    Variance,
    Autocovariance,
    Autocorrelation,
}

impl StatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatKind::Mean => "mean",
            StatKind::Variance => "variance",
            StatKind::Autocovariance => "autocovariance",
            StatKind::Autocorrelation => "autocorrelation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mean" => Some(StatKind::Mean),
            "variance" => Some(StatKind::Variance),
            "autocovariance" => Some(StatKind::Autocovariance),
            "autocorrelation" => Some(StatKind::Autocorrelation),
            _ => None,
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Patterns ────────────────────────────────────────────────────────────

/// One position of a tag pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagToken {
    Literal(String),
    Wildcard,
}

impl From<&str> for TagToken {
    fn from(s: &str) -> Self {
        TagToken::Literal(s.to_string())
    }
}

impl From<String> for TagToken {
    fn from(s: String) -> Self {
        TagToken::Literal(s)
    }
}

impl From<u32> for TagToken {
    fn from(n: u32) -> Self {
        TagToken::Literal(n.to_string())
    }
}

/// A token pattern matched against stats row names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPattern {
    tokens: Vec<TagToken>,
}

impl TagPattern {
    pub fn new(tokens: Vec<TagToken>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[TagToken] {
        &self.tokens
    }

    /// Regex source: literals escaped, wildcards as `.*`, joined with the
    /// tag separator and anchored at the end only.
    pub fn regex_source(&self) -> String {
        let parts: Vec<String> = self
            .tokens
            .iter()
            .map(|t| match t {
                TagToken::Literal(s) => regex::escape(s),
                TagToken::Wildcard => ".*".to_string(),
            })
            .collect();
        format!("{}$", parts.join(&regex::escape(TAG_SEPARATOR)))
    }

    pub fn compile(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.regex_source())
    }
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .tokens
            .iter()
            .map(|t| match t {
                TagToken::Literal(s) => s.as_str(),
                TagToken::Wildcard => "*",
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Build a [`TagPattern`] from literals and `*`.
#[macro_export]
macro_rules! tag_pattern {
    (@tok *) => { $crate::stats_index::TagToken::Wildcard };
    (@tok $lit:expr) => { $crate::stats_index::TagToken::from($lit) };
    ($($tok:tt),* $(,)?) => {
        $crate::stats_index::TagPattern::new(vec![$($crate::tag_pattern!(@tok $tok)),*])
    };
}

// ── Stats rows ──────────────────────────────────────────────────────────

/// One persisted stats row: the full row name and its stat cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    /// Row key including [`STATS_ROW_MARK`].
    pub name: String,
    /// Qualifier (`<stat>@<series>`) → value.
    pub stats: BTreeMap<String, Value>,
}

impl StatRow {
    /// Column tag this row describes.
    pub fn column_tag(&self) -> &str {
        self.name.strip_prefix(STATS_ROW_MARK).unwrap_or(&self.name)
    }

    /// Every value of one statistic, keyed by series id.
    pub fn by_series(&self, kind: StatKind) -> BTreeMap<String, f64> {
        let prefix = format!("{}{}", kind.as_str(), STAT_QUALIFIER_SEPARATOR);
        self.stats
            .iter()
            .filter_map(|(q, v)| Some((q.strip_prefix(&prefix)?.to_string(), v.as_f64()?)))
            .collect()
    }
}

/// Stats rows of one table in lexical row-name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    rows: BTreeMap<String, StatRow>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: StatRow) {
        self.rows.insert(row.name.clone(), row);
    }

    /// Insert an empty row for a column tag.
    pub fn insert_tag(&mut self, tag: &str) {
        self.insert(StatRow {
            name: stats_row_key(tag),
            stats: BTreeMap::new(),
        });
    }

    pub fn get(&self, tag: &str) -> Option<&StatRow> {
        self.rows.get(&stats_row_key(tag))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Stats of interest for the next stage plus the pattern naming its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub pattern: TagPattern,
    pub stats: Vec<StatKind>,
}

impl TargetDescriptor {
    pub fn new(pattern: TagPattern, stats: Vec<StatKind>) -> Self {
        Self { pattern, stats }
    }
}

/// A resolved input column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub column_name: String,
    pub stat_kinds: Vec<StatKind>,
}

/// Load the stats rows of `table`, keeping only the requested statistics.
/// Rows holding none of them are omitted.
pub fn load_stats(
    conn: &ScopedConnection,
    table: &str,
    stats: &[StatKind],
) -> Result<StatsTable, StoreError> {
    let spec = ScanSpec::all().rows(stats_row_filter()?);
    let wanted: Vec<&str> = stats.iter().map(|s| s.as_str()).collect();
    let mut out = StatsTable::new();
    for row in conn.scan_rows(table, &spec)? {
        let cells: BTreeMap<String, Value> = row
            .cells
            .into_iter()
            .filter(|c| {
                wanted.is_empty()
                    || c.qualifier
                        .split_once(STAT_QUALIFIER_SEPARATOR)
                        .is_some_and(|(stat, _)| wanted.contains(&stat))
            })
            .map(|c| (c.qualifier, c.value))
            .collect();
        if !cells.is_empty() {
            out.insert(StatRow {
                name: row.key,
                stats: cells,
            });
        }
    }
    Ok(out)
}

/// Row filter selecting stats rows.
pub fn stats_row_filter() -> Result<Regex, regex::Error> {
    Regex::new(&format!("^{}", regex::escape(STATS_ROW_MARK)))
}

/// Find the first stats row (lexical order) whose name matches the pattern
/// and return its column tag.
pub fn resolve_target_column(
    stats: &StatsTable,
    target: &TargetDescriptor,
) -> Result<Option<ColumnDescriptor>, regex::Error> {
    let re = target.pattern.compile()?;
    Ok(stats
        .iter()
        .find(|row| re.is_match(&row.name))
        .map(|row| ColumnDescriptor {
            column_name: row.column_tag().to_string(),
            stat_kinds: target.stats.clone(),
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(tags: &[&str]) -> StatsTable {
        let mut t = StatsTable::new();
        for tag in tags {
            t.insert_tag(tag);
        }
        t
    }

    fn target(pattern: TagPattern) -> TargetDescriptor {
        TargetDescriptor::new(pattern, vec![StatKind::Mean])
    }

    #[test]
    fn build_tag_joins_with_separator() {
        assert_eq!(build_tag(&["a", "b", "3"]), "a_b_3");
        assert_eq!(build_tag::<&str>(&[]), "");
    }

    #[test]
    fn literal_pattern_matches_marked_row() {
        let re = tag_pattern!["a", "b", "3"].compile().unwrap();
        assert!(re.is_match(&stats_row_key("a_b_3")));
    }

    #[test]
    fn wildcard_pattern() {
        let re = tag_pattern!["a", *, "3"].compile().unwrap();
        assert!(re.is_match(&stats_row_key("a_b_3")));
        assert!(!re.is_match(&stats_row_key("a_b_4")));
    }

    #[test]
    fn literal_tokens_are_escaped() {
        let re = tag_pattern!["a.b"].compile().unwrap();
        assert!(re.is_match("#stats#a.b"));
        assert!(!re.is_match("#stats#axb"));
    }

    #[test]
    fn resolution_is_lexically_first() {
        let t = table(&["y_step_1", "x_step_1", "x_step_0"]);
        for _ in 0..10 {
            let col = resolve_target_column(&t, &target(tag_pattern![*, "1"]))
                .unwrap()
                .unwrap();
            assert_eq!(col.column_name, "x_step_1");
        }
    }

    #[test]
    fn end_anchor_rejects_longer_suffix() {
        let t = table(&["temp_step_11"]);
        assert!(resolve_target_column(&t, &target(tag_pattern![*, "1"]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn lag_pattern_resolves_lag_zero() {
        let t = table(&["temp_step_1_lag_0", "temp_step_1_lag_1", "temp_step_1_lag_2"]);
        let col = resolve_target_column(&t, &target(tag_pattern![*, 1u32, "lag", "0"]))
            .unwrap()
            .unwrap();
        assert_eq!(col.column_name, "temp_step_1_lag_0");
    }

    #[test]
    fn stat_row_by_series() {
        let mut stats = BTreeMap::new();
        stats.insert(stat_qualifier(StatKind::Mean, "S1"), Value::Double(1.5));
        stats.insert(stat_qualifier(StatKind::Mean, "S2"), Value::Double(2.5));
        stats.insert(stat_qualifier(StatKind::Variance, "S1"), Value::Double(0.5));
        let row = StatRow {
            name: stats_row_key("temp_step_1"),
            stats,
        };
        assert_eq!(row.column_tag(), "temp_step_1");
        assert_eq!(row.by_series(StatKind::Variance)["S1"], 0.5);
        let means = row.by_series(StatKind::Mean);
        assert_eq!(means.len(), 2);
        assert_eq!(means["S2"], 2.5);
    }

    #[test]
    fn pattern_display() {
        assert_eq!(tag_pattern![*, "1", "lag", "0"].to_string(), "[*, 1, lag, 0]");
    }
}
