//! Partition, grouping and sort policies over composite keys.
//!
//! Together the three policies guarantee that every reduce call receives
//! all and only the records of one series, ordered by column tag and then
//! timestamp:
//!
//! - the partitioner looks at `series_id` only, so a series never spans
//!   partitions;
//! - the sort order is `(series_id, column_tag, timestamp)`;
//! - the grouping comparator splits a sorted partition wherever
//!   `series_id` changes.

use std::cmp::Ordering;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::record::{CompositeKey, TimeSeriesRecord};

/// Assigns a record to a partition.
pub trait Partitioner: Send + Sync {
    fn partition(&self, key: &CompositeKey, partitions: usize) -> usize;
}

/// Decides whether two sorted neighbours belong to the same reduce call.
pub trait GroupingComparator: Send + Sync {
    fn same_group(&self, a: &CompositeKey, b: &CompositeKey) -> bool;
}

/// Total order of records within a partition.
pub trait SortComparator: Send + Sync {
    fn compare(&self, a: &CompositeKey, b: &CompositeKey) -> Ordering;
}

/// Stable partition of a series id: the first eight bytes of its SHA-256
/// digest, big-endian, modulo the partition count.
pub fn series_partition(series_id: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(series_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % partitions as u64) as usize
}

/// Partitions by series id.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeriesPartitioner;

impl Partitioner for SeriesPartitioner {
    fn partition(&self, key: &CompositeKey, partitions: usize) -> usize {
        series_partition(key.series_id.as_str(), partitions)
    }
}

/// Groups by series id equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeriesGrouping;

impl GroupingComparator for SeriesGrouping {
    fn same_group(&self, a: &CompositeKey, b: &CompositeKey) -> bool {
        a.series_id == b.series_id
    }
}

/// Orders by `(series_id, column_tag, timestamp)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositeKeyOrder;

impl SortComparator for CompositeKeyOrder {
    fn compare(&self, a: &CompositeKey, b: &CompositeKey) -> Ordering {
        a.series_id
            .cmp(&b.series_id)
            .then_with(|| a.column_tag.cmp(&b.column_tag))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    }
}

/// The three policies a job carries.
#[derive(Clone)]
pub struct ShufflePolicies {
    pub partitioner: Arc<dyn Partitioner>,
    pub grouping: Arc<dyn GroupingComparator>,
    pub sort: Arc<dyn SortComparator>,
}

impl ShufflePolicies {
    /// The composite-key policies.
    pub fn composite() -> Self {
        Self {
            partitioner: Arc::new(SeriesPartitioner),
            grouping: Arc::new(SeriesGrouping),
            sort: Arc::new(CompositeKeyOrder),
        }
    }
}

impl Default for ShufflePolicies {
    fn default() -> Self {
        Self::composite()
    }
}

impl std::fmt::Debug for ShufflePolicies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShufflePolicies").finish_non_exhaustive()
    }
}

/// Split map output into `partitions` buckets.
pub fn partition_records(
    records: Vec<TimeSeriesRecord>,
    policies: &ShufflePolicies,
    partitions: usize,
) -> Vec<Vec<TimeSeriesRecord>> {
    let partitions = partitions.max(1);
    let mut buckets: Vec<Vec<TimeSeriesRecord>> = (0..partitions).map(|_| Vec::new()).collect();
    for record in records {
        let idx = policies.partitioner.partition(&record.key, partitions) % partitions;
        buckets[idx].push(record);
    }
    buckets
}

/// Sort one partition and cut it into reduce groups.
pub fn sort_and_group(
    mut partition: Vec<TimeSeriesRecord>,
    policies: &ShufflePolicies,
) -> Vec<Vec<TimeSeriesRecord>> {
    partition.sort_by(|a, b| policies.sort.compare(&a.key, &b.key));
    let mut groups: Vec<Vec<TimeSeriesRecord>> = Vec::new();
    for record in partition {
        let joins = groups
            .last()
            .and_then(|g| g.last())
            .is_some_and(|prev| policies.grouping.same_group(&prev.key, &record.key));
        match groups.last_mut() {
            Some(group) if joins => group.push(record),
            _ => groups.push(vec![record]),
        }
    }
    groups
}

/// Full shuffle: partition, then sort and group every partition.
/// `result[p]` holds the reduce groups of partition `p` in sort order.
pub fn shuffle_sort(
    records: Vec<TimeSeriesRecord>,
    policies: &ShufflePolicies,
    partitions: usize,
) -> Vec<Vec<Vec<TimeSeriesRecord>>> {
    partition_records(records, policies, partitions)
        .into_iter()
        .map(|p| sort_and_group(p, policies))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TimeSeriesValue;
    use wx_common::SeriesId;

    fn rec(series: &str, tag: &str, ts: i64) -> TimeSeriesRecord {
        TimeSeriesRecord::new(
            CompositeKey::new(SeriesId(series.to_string()), ts, tag),
            TimeSeriesValue::single(ts as f64),
        )
    }

    #[test]
    fn partition_is_deterministic_and_in_range() {
        for n in 1..16 {
            let p = series_partition("station-42", n);
            assert!(p < n);
            assert_eq!(p, series_partition("station-42", n));
        }
        assert_eq!(series_partition("anything", 0), 0);
    }

    #[test]
    fn single_partition_groups_by_series() {
        let records = vec![
            rec("B", "temp", 2),
            rec("A", "temp", 3),
            rec("B", "temp", 1),
            rec("A", "hum", 9),
            rec("A", "temp", 1),
        ];
        let out = shuffle_sort(records, &ShufflePolicies::composite(), 1);
        assert_eq!(out.len(), 1);
        let groups = &out[0];
        assert_eq!(groups.len(), 2);

        let a: Vec<(String, i64)> = groups[0]
            .iter()
            .map(|r| (r.key.column_tag.clone(), r.key.timestamp))
            .collect();
        assert_eq!(
            a,
            vec![
                ("hum".to_string(), 9),
                ("temp".to_string(), 1),
                ("temp".to_string(), 3)
            ]
        );
        assert!(groups[1].iter().all(|r| r.key.series_id.as_str() == "B"));
        assert_eq!(groups[1][0].key.timestamp, 1);
    }

    #[test]
    fn series_never_split_across_partitions() {
        let records: Vec<_> = (0..50)
            .map(|i| rec(&format!("S{}", i % 7), "t", i))
            .collect();
        let out = shuffle_sort(records, &ShufflePolicies::composite(), 4);
        let total_groups: usize = out.iter().map(Vec::len).sum();
        assert_eq!(total_groups, 7);
    }

    #[test]
    fn empty_input_gives_empty_partitions() {
        let out = shuffle_sort(Vec::new(), &ShufflePolicies::composite(), 3);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(Vec::is_empty));
    }
}
