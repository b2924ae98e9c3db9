//! Property tests for archive resolution and slice ordering.

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use seisan_picker::{
    catalog::ArchiveRecord,
    resolver::{build_archive_path, ArchiveResolver},
    slicer::{order_and_dedupe, SliceKey},
};

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()
}

fn record_strategy() -> impl Strategy<Value = ArchiveRecord> {
    (
        prop::sample::select(vec!["ST1", "ST2", "NKL"]),
        prop::sample::select(vec!["BHZ", "BHN", "SHE"]),
        0i64..2000,
        prop::option::of(0i64..2000),
    )
        .prop_map(|(station, channel, from, len)| ArchiveRecord {
            station:           station.to_string(),
            channel_code:      channel.to_string(),
            subdirectory_code: "00".into(),
            location_code:     "".into(),
            valid_from:        epoch() + Duration::days(from),
            valid_until:       len.map(|l| epoch() + Duration::days(from + l)),
        })
}

#[derive(Debug, Clone)]
struct Key(String, String, usize);

impl SliceKey for Key {
    fn station(&self) -> &str {
        &self.0
    }

    fn channel_label(&self) -> &str {
        &self.1
    }
}

fn keys_strategy() -> impl Strategy<Value = Vec<Key>> {
    prop::collection::vec(
        (prop::sample::select(vec!["A", "B", "C"]), prop::sample::select(vec!["HHN", "HHE", "HHZ", "HH1"])),
        0..20,
    )
    .prop_map(|v| {
        v.into_iter()
            .enumerate()
            .map(|(i, (s, c))| Key(s.to_string(), c.to_string(), i))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn resolve_returns_exactly_the_covering_records(
        records in prop::collection::vec(record_strategy(), 0..12),
        day in 0i64..4500,
        station in prop::sample::select(vec!["ST1", "ST2", "NKL"]),
    ) {
        let t = epoch() + Duration::days(day) + Duration::hours(12);
        let resolver = ArchiveResolver::new(records.clone(), "/archive");
        let hits = resolver.resolve(station, t);

        let expected: Vec<&ArchiveRecord> = records
            .iter()
            .filter(|r| r.station == station && r.valid_from <= t && r.valid_until.map_or(true, |u| t <= u))
            .collect();
        prop_assert_eq!(hits.clone(), expected);
        prop_assert_eq!(resolver.first_match(station, t), hits.first().copied());
    }

    #[test]
    fn archive_paths_differ_by_day(rec in record_strategy(), a in 1u32..=366, b in 1u32..=366) {
        let root = Path::new("/archive");
        let pa = build_archive_path(&rec, 2014, a, root);
        prop_assert_eq!(&pa, &build_archive_path(&rec, 2014, a, root));
        prop_assert_eq!(a == b, pa == build_archive_path(&rec, 2014, b, root));
        prop_assert!(pa.starts_with(root.join("00").join(&rec.station)));
    }

    #[test]
    fn ordered_groups_are_complete_and_first_wins(items in keys_strategy()) {
        let order = ['N', 'E', 'Z'];
        let out = order_and_dedupe(items.clone(), &order);

        prop_assert_eq!(out.len() % order.len(), 0);
        for group in out.chunks(order.len()) {
            let station = &group[0].0;
            for (slot, key) in group.iter().enumerate() {
                prop_assert_eq!(&key.0, station);
                prop_assert!(key.1.ends_with(order[slot]));
                let first = items.iter().find(|k| &k.0 == station && k.1.ends_with(order[slot]));
                prop_assert_eq!(first.map(|k| k.2), Some(key.2));
            }
        }
        let stations: Vec<&String> = out.chunks(order.len()).map(|g| &g[0].0).collect();
        let mut sorted = stations.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(stations, sorted);
    }
}
