//! Stations with at least one pick, and when they picked.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::error::PickerError;
use crate::nordic;
use crate::trace::span_secs;

/// Pick times per station, gathered from S-files.
#[derive(Debug, Clone, Default)]
pub struct PickIndex {
    picks: BTreeMap<String, Vec<DateTime<Utc>>>,
}

impl PickIndex {
    /// Read every S-file; unreadable ones are logged and skipped.
    pub fn from_files(files: &[PathBuf]) -> Self {
        let mut index = Self::default();
        let mut unreadable = 0usize;
        for file in files {
            match nordic::read_event(file) {
                Ok(event) => {
                    for pick in event.picks {
                        index.insert(&pick.station, pick.time);
                    }
                }
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "skipping unreadable S-file");
                    unreadable += 1;
                }
            }
        }
        for times in index.picks.values_mut() {
            times.sort();
        }
        if unreadable > 0 {
            warn!(unreadable, "some S-files could not be read");
        }
        index
    }

    pub fn insert(&mut self, station: &str, time: DateTime<Utc>) {
        self.picks.entry(station.to_string()).or_default().push(time);
    }

    pub fn stations(&self) -> BTreeSet<String> {
        self.picks.keys().cloned().collect()
    }

    /// The station picked something on `day` (UTC).
    pub fn has_pick_on(&self, station: &str, day: NaiveDate) -> bool {
        self.picks
            .get(station)
            .is_some_and(|times| times.iter().any(|t| t.date_naive() == day))
    }

    /// Some pick of the station lies within `tolerance` seconds of
    /// `[start, end]`.
    pub fn has_pick_near(&self, station: &str, start: DateTime<Utc>, end: DateTime<Utc>, tolerance: f64) -> bool {
        self.picks.get(station).is_some_and(|times| {
            times
                .iter()
                .any(|t| span_secs(*t, start) <= tolerance && span_secs(end, *t) <= tolerance)
        })
    }
}

pub fn collect_stations(files: &[PathBuf]) -> BTreeSet<String> {
    PickIndex::from_files(files).stations()
}

/// One station per line.
pub fn save_stations(path: &Path, stations: &BTreeSet<String>) -> Result<(), PickerError> {
    let mut text = String::new();
    for s in stations {
        text.push_str(s);
        text.push('\n');
    }
    fs::write(path, text).map_err(|e| PickerError::Persistence {
        path:   path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!(path = %path.display(), count = stations.len(), "stations list saved");
    Ok(())
}

pub fn load_stations(path: &Path) -> Result<BTreeSet<String>, PickerError> {
    let text = fs::read_to_string(path).map_err(|e| {
        PickerError::FatalConfiguration(format!("cannot read stations list {}: {e}", path.display()))
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    #[test]
    fn day_and_window_checks() {
        let t = Utc.with_ymd_and_hms(2014, 5, 2, 12, 0, 0).unwrap();
        let mut idx = PickIndex::default();
        idx.insert("NKL", t);

        assert!(idx.has_pick_on("NKL", t.date_naive()));
        assert!(!idx.has_pick_on("NKL", t.date_naive().succ_opt().unwrap()));
        assert!(!idx.has_pick_on("ARGI", t.date_naive()));

        let w = |from: i64| (t + Duration::seconds(from), t + Duration::seconds(from + 4));
        let (s, e) = w(10);
        assert!(idx.has_pick_near("NKL", s, e, 15.0));
        let (s, e) = w(20);
        assert!(!idx.has_pick_near("NKL", s, e, 15.0));
        let (s, e) = w(-19);
        assert!(idx.has_pick_near("NKL", s, e, 15.0));
        let (s, e) = w(-20);
        assert!(!idx.has_pick_near("NKL", s, e, 15.0));
    }

    #[test]
    fn list_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stations");
        let set: BTreeSet<String> = ["NKL", "ARGI", "YSH"].iter().map(|s| s.to_string()).collect();
        save_stations(&path, &set).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ARGI\nNKL\nYSH\n");
        assert_eq!(load_stations(&path).unwrap(), set);
    }
}
