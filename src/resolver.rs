//! Station + time → archive record(s) → day-file path.
//!
//! The resolver only does path arithmetic; it never touches the filesystem.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::catalog::ArchiveRecord;

/// `archive_root/SUB/STAT/STAT.SUB.LOC.CHA.YYYY.DDD`
pub fn build_archive_path(
    record:       &ArchiveRecord,
    year:         i32,
    day_of_year:  u32,
    archive_root: &Path,
) -> PathBuf {
    let file = format!(
        "{st}.{sub}.{loc}.{cha}.{year:04}.{day_of_year:03}",
        st  = record.station,
        sub = record.subdirectory_code,
        loc = record.location_code,
        cha = record.channel_code,
    );
    archive_root
        .join(&record.subdirectory_code)
        .join(&record.station)
        .join(file)
}

#[derive(Debug, Clone)]
pub struct ArchiveResolver {
    records: Vec<ArchiveRecord>,
    root:    PathBuf,
}

impl ArchiveResolver {
    pub fn new(records: Vec<ArchiveRecord>, root: impl Into<PathBuf>) -> Self {
        Self { records, root: root.into() }
    }

    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every record of `station` valid at `t`, in catalog order. An empty
    /// result means the station has no archive coverage at that time.
    pub fn resolve(&self, station: &str, t: DateTime<Utc>) -> Vec<&ArchiveRecord> {
        self.records
            .iter()
            .filter(|r| r.station == station && r.covers(t))
            .collect()
    }

    /// First covering record in catalog order.
    pub fn first_match(&self, station: &str, t: DateTime<Utc>) -> Option<&ArchiveRecord> {
        self.records.iter().find(|r| r.station == station && r.covers(t))
    }

    /// Day file of `record` holding time `t`.
    pub fn archive_path(&self, record: &ArchiveRecord, t: DateTime<Utc>) -> PathBuf {
        build_archive_path(record, t.year(), t.ordinal(), &self.root)
    }

    /// Candidate (record, day file) pairs for `station` at `t`. Day files
    /// are not checked for existence.
    pub fn candidate_paths(&self, station: &str, t: DateTime<Utc>) -> Vec<(&ArchiveRecord, PathBuf)> {
        self.resolve(station, t)
            .into_iter()
            .map(|r| (r, self.archive_path(r, t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_definitions;
    use chrono::TimeZone;

    fn resolver() -> ArchiveResolver {
        let defs = parse_definitions(
            "ARC_CHAN ST1 BHZ00 20140101\n\
             ARC_CHAN ST1 BHN00 20140101 20141231\n\
             ARC_CHAN ST2 BHZ00 20100101\n",
        );
        ArchiveResolver::new(defs, "/seismo/archive")
    }

    #[test]
    fn open_ended_resolution() {
        let r = resolver();
        let t = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        let hits = r.resolve("ST1", t);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].valid_until.is_none());

        let before = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        assert!(r.resolve("ST1", before).is_empty());
    }

    #[test]
    fn catalog_order_is_kept() {
        let r = resolver();
        let t = Utc.with_ymd_and_hms(2014, 6, 1, 0, 0, 0).unwrap();
        let chans: Vec<_> = r.resolve("ST1", t).iter().map(|x| x.channel_code.clone()).collect();
        assert_eq!(chans, ["BHZ", "BHN"]);
        assert_eq!(r.first_match("ST1", t).unwrap().channel_code, "BHZ");
    }

    #[test]
    fn path_layout() {
        let r = resolver();
        let rec = &r.records()[0];
        let p = build_archive_path(rec, 2014, 5, Path::new("/seismo/archive"));
        assert_eq!(p, PathBuf::from("/seismo/archive/00/ST1/ST1.00..BHZ.2014.005"));

        let t = Utc.with_ymd_and_hms(2014, 12, 31, 23, 0, 0).unwrap();
        assert!(r.archive_path(rec, t).ends_with("ST1.00..BHZ.2014.365"));
    }
}
