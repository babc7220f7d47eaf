//! Observation identity and row-key encoding.
//!
//! A stored data row is keyed `<series_id>/r-<YYYYMMDDHH>`; the mapper turns
//! each numeric cell of such a row into one [`TimeSeriesRecord`] whose
//! [`CompositeKey`] drives partitioning, grouping and ordering.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wx_common::SeriesId;

/// Prefix of the time part of a data row key.
pub const ROWNAME_PREFIX: &str = "r-";
/// Separates the series id from the time part of a row key.
pub const ROW_KEY_SEPARATOR: char = '/';
/// chrono format of the hour stamp in a row key.
pub const ROW_TIME_FORMAT: &str = "%Y%m%d%H";
/// Attribute name a mapper uses for the single observed value.
pub const VALUE_ATTRIBUTE: &str = "value";

const SECONDS_PER_HOUR: i64 = 3600;

/// A row or cell that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("row key '{0}' has no series separator")]
    MissingSeparator(String),

    #[error("row key '{0}' has an empty or reserved series id")]
    InvalidSeries(String),

    #[error("row key '{row}' has an unparseable timestamp")]
    BadTimestamp { row: String },

    #[error("cell {column} of row '{row}' is not numeric")]
    NonNumeric { row: String, column: String },
}

impl RecordError {
    pub fn row(&self) -> &str {
        match self {
            RecordError::MissingSeparator(row) | RecordError::InvalidSeries(row) => row,
            RecordError::BadTimestamp { row } | RecordError::NonNumeric { row, .. } => row,
        }
    }
}

impl From<RecordError> for wx_common::Error {
    fn from(err: RecordError) -> Self {
        wx_common::Error::RecordParse {
            row: err.row().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Identity of one value within a stage output.
///
/// `(series_id, column_tag, timestamp)` is unique per stage output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub series_id: SeriesId,
    /// Hours since the Unix epoch.
    pub timestamp: i64,
    pub column_tag: String,
}

impl CompositeKey {
    pub fn new(series_id: SeriesId, timestamp: i64, column_tag: impl Into<String>) -> Self {
        Self {
            series_id,
            timestamp,
            column_tag: column_tag.into(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.series_id, self.column_tag, self.timestamp)
    }
}

/// Named attribute values observed at one timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesValue {
    attributes: BTreeMap<String, f64>,
}

impl TimeSeriesValue {
    /// A value carrying only [`VALUE_ATTRIBUTE`].
    pub fn single(value: f64) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(VALUE_ATTRIBUTE.to_string(), value);
        Self { attributes }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }

    /// The [`VALUE_ATTRIBUTE`] entry.
    pub fn value(&self) -> Option<f64> {
        self.get(VALUE_ATTRIBUTE)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// One observation travelling through the shuffle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub key: CompositeKey,
    pub value: TimeSeriesValue,
}

impl TimeSeriesRecord {
    pub fn new(key: CompositeKey, value: TimeSeriesValue) -> Self {
        Self { key, value }
    }
}

// ── Row keys ────────────────────────────────────────────────────────────

/// Epoch hour containing `at`.
pub fn hour_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECONDS_PER_HOUR)
}

/// Start of the given epoch hour.
pub fn datetime_of_hour(hour: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(hour.checked_mul(SECONDS_PER_HOUR)?, 0)
}

/// Build the data row key for a series at an epoch hour.
pub fn encode_row_key(series: &SeriesId, hour: i64) -> Option<String> {
    let at = datetime_of_hour(hour)?;
    Some(format!(
        "{}{}{}{}",
        series,
        ROW_KEY_SEPARATOR,
        ROWNAME_PREFIX,
        at.format(ROW_TIME_FORMAT)
    ))
}

/// Split a data row key into its series id and epoch hour.
pub fn parse_row_key(row: &str) -> Result<(SeriesId, i64), RecordError> {
    let (series, stamp) = row
        .rsplit_once(ROW_KEY_SEPARATOR)
        .ok_or_else(|| RecordError::MissingSeparator(row.to_string()))?;
    let series = SeriesId::parse(series).ok_or_else(|| RecordError::InvalidSeries(row.to_string()))?;
    let hour = stamp
        .strip_prefix(ROWNAME_PREFIX)
        .and_then(parse_hour_stamp)
        .ok_or_else(|| RecordError::BadTimestamp {
            row: row.to_string(),
        })?;
    Ok((series, hour))
}

fn parse_hour_stamp(stamp: &str) -> Option<i64> {
    if stamp.len() != 10 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&stamp[..8], "%Y%m%d").ok()?;
    let hour: u32 = stamp[8..].parse().ok()?;
    let at = date.and_hms_opt(hour, 0, 0)?.and_utc();
    Some(hour_of(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s1() -> SeriesId {
        SeriesId::parse("S1").unwrap()
    }

    #[test]
    fn row_key_round_trips() {
        let at = Utc.with_ymd_and_hms(2020, 1, 2, 13, 0, 0).unwrap();
        let key = encode_row_key(&s1(), hour_of(at)).unwrap();
        assert_eq!(key, "S1/r-2020010213");
        assert_eq!(parse_row_key(&key).unwrap(), (s1(), hour_of(at)));
    }

    #[test]
    fn hour_truncates_minutes() {
        let a = Utc.with_ymd_and_hms(2020, 1, 1, 5, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap();
        assert_eq!(hour_of(a), hour_of(b));
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!(matches!(
            parse_row_key("S1-r-2020010100"),
            Err(RecordError::MissingSeparator(_))
        ));
        assert!(matches!(
            parse_row_key("/r-2020010100"),
            Err(RecordError::InvalidSeries(_))
        ));
        assert!(matches!(
            parse_row_key("S1/r-20200101"),
            Err(RecordError::BadTimestamp { .. })
        ));
        assert!(matches!(
            parse_row_key("S1/x-2020010100"),
            Err(RecordError::BadTimestamp { .. })
        ));
        assert!(matches!(
            parse_row_key("S1/r-2020010125"),
            Err(RecordError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn record_error_maps_to_code_50() {
        let err: wx_common::Error = RecordError::MissingSeparator("x".into()).into();
        assert_eq!(err.code(), 50);
    }

    #[test]
    fn value_attributes() {
        let v = TimeSeriesValue::single(1.5).with("quality", 0.9);
        assert_eq!(v.value(), Some(1.5));
        assert_eq!(v.get("quality"), Some(0.9));
        assert_eq!(v.len(), 2);
    }
}
