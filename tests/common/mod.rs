//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use seisan_picker::{mseed, trace::Trace, Config};
use tempfile::TempDir;

pub const STATION: &str = "ST1";
pub const CHANNELS: [&str; 3] = ["BHN", "BHE", "BHZ"];

/// 80-column Nordic line with `fields` at their 1-based start columns.
pub fn nordic_line(fields: &[(usize, &str)], kind: char) -> String {
    let mut buf = vec![b' '; 80];
    for (at, s) in fields {
        buf[at - 1..at - 1 + s.len()].copy_from_slice(s.as_bytes());
    }
    buf[79] = kind as u8;
    String::from_utf8(buf).unwrap()
}

pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 4, 13, 14, 9, 58).unwrap()
}

/// `(station, phase, time)` picks for an event on 2014-04-13.
pub fn sfile_text(event_id: Option<&str>, magnitude: &str, picks: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut lines = vec![nordic_line(
        &[(2, "2014"), (7, " 4"), (9, "13"), (12, "14"), (14, "09"), (17, "58.0"), (39, " 10.0"), (56, magnitude)],
        '1',
    )];
    if let Some(id) = event_id {
        lines.push(nordic_line(&[(2, "ACTION:UPD 14-04-13 14:17 OP:mkt  STATUS:"), (58, "ID:"), (61, id)], 'I'));
    }
    lines.push(" STAT SP IPHASW D HRMM SECON CODA AMPLIT PERI AZIMU VELO AIN AR TRES W  DIS CAZ7".to_string());
    for (station, phase, t) in picks {
        let hhmm = t.format("%H%M").to_string();
        let sec = format!("{:6.2}", f64::from(t.second()) + f64::from(t.timestamp_subsec_millis()) / 1000.0);
        lines.push(nordic_line(&[(2, station), (7, "BZ"), (11, phase), (19, &hhmm), (23, &sec), (71, "   30")], ' '));
    }
    lines.join("\n") + "\n"
}

pub fn write_sfile(dir: &Path, name: &str, text: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

pub fn ramp(station: &str, channel: &str, start: DateTime<Utc>, seconds: usize, rate: f64) -> Trace {
    let n = (seconds as f64 * rate) as usize + 1;
    Trace {
        network:       "IM".into(),
        station:       station.into(),
        location:      "".into(),
        channel:       channel.into(),
        start,
        sampling_rate: rate,
        samples:       (0..n).map(|i| ((i % 200) as f64) - 100.0).collect(),
    }
}

/// Archive day file path for codes `<channel>00` (subdir `00`, no location).
pub fn archive_file(root: &Path, station: &str, channel: &str, day: DateTime<Utc>) -> PathBuf {
    root.join("00")
        .join(station)
        .join(format!("{station}.00..{channel}.{:04}.{:03}", day.year(), day.ordinal()))
}

pub fn write_archive(root: &Path, tr: &Trace) -> PathBuf {
    let path = archive_file(root, &tr.station, &tr.channel, tr.start);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    mseed::write_trace(&path, tr).unwrap();
    path
}

pub fn definitions_text(stations: &[&str]) -> String {
    let mut text = String::from("# archive channels\n");
    for st in stations {
        for ch in CHANNELS {
            text.push_str(&format!("ARC_CHAN {st:<5} {ch}00    20100101\n"));
        }
    }
    text
}

/// Temporary SEISAN-like layout: `rea/`, `archive/`, `SEISAN.DEF`, `out/`.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(stations: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("rea")).unwrap();
        fs::create_dir_all(dir.path().join("archive")).unwrap();
        fs::write(dir.path().join("SEISAN.DEF"), definitions_text(stations)).unwrap();
        Self { dir }
    }

    pub fn rea(&self) -> PathBuf {
        self.dir.path().join("rea")
    }

    pub fn archive(&self) -> PathBuf {
        self.dir.path().join("archive")
    }

    pub fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn config(&self) -> Config {
        let mut c = Config::default();
        c.rea_path = self.rea();
        c.definitions = vec![self.dir.path().join("SEISAN.DEF")];
        c.archives_path = self.archive();
        c.save_dir = self.out();
        c.batch.heartbeat_every = 0;
        c
    }

    /// One minute of three-component data around the test origin.
    pub fn write_station_archives(&self, station: &str) {
        let start = origin() - Duration::seconds(28);
        for ch in CHANNELS {
            write_archive(&self.archive(), &ramp(station, ch, start, 60, 100.0));
        }
    }
}

/// Every file below `dir`, relative and sorted.
pub fn tree(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    out.sort();
    out
}
