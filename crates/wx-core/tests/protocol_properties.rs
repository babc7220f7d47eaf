//! Property-based tests for the shuffle protocol and the stats index.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use wx_common::SeriesId;
use wx_core::shuffle::{series_partition, shuffle_sort, ShufflePolicies};
use wx_core::stats_index::{
    build_tag, resolve_target_column, stats_row_key, StatKind, StatRow, StatsTable,
    TargetDescriptor,
};
use wx_core::store::Value;
use wx_core::{tag_pattern, CompositeKey, TimeSeriesRecord, TimeSeriesValue};

fn key_strategy() -> impl Strategy<Value = (String, i64, String)> {
    (
        prop::sample::select(vec!["S1", "S2", "3904", "north", "x-7"]),
        0i64..500,
        prop::sample::select(vec!["temp", "temp_step_1", "rain"]),
    )
        .prop_map(|(s, t, c)| (s.to_string(), t, c.to_string()))
}

fn records(keys: &[(String, i64, String)]) -> Vec<TimeSeriesRecord> {
    keys.iter()
        .map(|(s, t, c)| {
            TimeSeriesRecord::new(
                CompositeKey::new(SeriesId(s.clone()), *t, c.clone()),
                TimeSeriesValue::single(*t as f64),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every reduce group holds exactly one series, each series lands in
    /// exactly one group, and groups are sorted by (column, time).
    #[test]
    fn grouping_is_one_group_per_series(
        keys in prop::collection::vec(key_strategy(), 0..200),
        partitions in 1usize..8,
    ) {
        let input = records(&keys);
        let total = input.len();
        let shuffled = shuffle_sort(input, &ShufflePolicies::composite(), partitions);
        prop_assert_eq!(shuffled.len(), partitions);

        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut count = 0;
        for partition in &shuffled {
            for group in partition {
                let series = &group[0].key.series_id;
                prop_assert!(group.iter().all(|r| &r.key.series_id == series));
                for pair in group.windows(2) {
                    let a = (&pair[0].key.column_tag, pair[0].key.timestamp);
                    let b = (&pair[1].key.column_tag, pair[1].key.timestamp);
                    prop_assert!(a <= b);
                }
                *seen.entry(series.as_str().to_string()).or_default() += 1;
                count += group.len();
            }
        }
        prop_assert_eq!(count, total);
        prop_assert!(seen.values().all(|&n| n == 1));
        let expected: BTreeSet<String> = keys.iter().map(|k| k.0.clone()).collect();
        prop_assert_eq!(seen.keys().cloned().collect::<BTreeSet<_>>(), expected);
    }

    /// Same series and partition count always give the same partition.
    #[test]
    fn partition_is_stable(series in "[A-Za-z0-9_-]{1,16}", partitions in 1usize..64) {
        let first = series_partition(&series, partitions);
        prop_assert!(first < partitions);
        for _ in 0..3 {
            prop_assert_eq!(series_partition(&series, partitions), first);
        }
    }

    /// Resolution over any set of candidate columns picks the lexically first.
    #[test]
    fn resolution_picks_lexically_first(
        bases in prop::collection::btree_set("[a-z]{1,6}", 1..6),
        order in 0u32..4,
    ) {
        let mut table = StatsTable::new();
        for base in &bases {
            let order_token = order.to_string();
            let tag = build_tag(&[base.as_str(), "step", order_token.as_str()]);
            table.insert(StatRow {
                name: stats_row_key(&tag),
                stats: [("mean@S1".to_string(), Value::Double(1.0))].into_iter().collect(),
            });
        }
        let target = TargetDescriptor::new(tag_pattern![*, order], vec![StatKind::Mean]);
        let resolved = resolve_target_column(&table, &target).unwrap().unwrap();
        let first = bases.iter().next().unwrap();
        prop_assert_eq!(resolved.column_name, format!("{first}_step_{order}"));
    }
}

#[test]
fn tag_pattern_matches_exact_and_wildcard() {
    assert_eq!(build_tag(&["a", "b", "3"]), "a_b_3");
    let exact = tag_pattern!["a", "b", "3"].compile().unwrap();
    assert!(exact.is_match(&stats_row_key("a_b_3")));
    let wild = tag_pattern!["a", *, "3"].compile().unwrap();
    assert!(wild.is_match(&stats_row_key("a_b_3")));
    assert!(!wild.is_match(&stats_row_key("a_b_4")));
}

#[test]
fn resolution_prefers_x_over_y() {
    let mut table = StatsTable::new();
    for tag in ["y_step_1", "x_step_1"] {
        table.insert(StatRow {
            name: stats_row_key(tag),
            stats: [("mean@S1".to_string(), Value::Double(0.0))].into_iter().collect(),
        });
    }
    let target = TargetDescriptor::new(tag_pattern![*, "1"], vec![StatKind::Mean]);
    for _ in 0..10 {
        let col = resolve_target_column(&table, &target).unwrap().unwrap();
        assert_eq!(col.column_name, "x_step_1");
    }
}
