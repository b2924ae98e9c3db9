//! Key/value metadata files: run progress, per-event and per-pick-group
//! descriptions.
//!
//! Each file is a flat TOML table preceded by a `# [Section]` comment line.
//! Unknown keys, missing required keys and a schema version other than
//! [`CURRENT_VERSION`] all fail the read.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::StatsError;

pub const CURRENT_VERSION: u32 = 1;

pub const PICKING_STATS_FILE: &str = "picking.stats";
pub const EVENT_STATS_FILE:   &str = "event.stats";
pub const PICKS_STATS_FILE:   &str = "picks.stats";

/// A record type with its own file name and section title.
pub trait StatsFile: Serialize + DeserializeOwned {
    const SECTION:   &'static str;
    const FILE_NAME: &'static str;

    fn version(&self) -> u32;
}

// ─────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────
/// Progress of a batch run, rewritten after every source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct BatchProgress {
    pub version:                u32,
    pub last_file_parsed:       Option<PathBuf>,
    /// Set while a file is being processed; still set on load means the
    /// previous run died mid-file.
    pub file_currently_parsed:  Option<PathBuf>,
    #[serde(rename = "ErrorEventID")]
    pub error_event_id:         Option<String>,

    pub total_files_parsed:     u64,
    pub total_events_parsed:    u64,
    pub total_phases_parsed:    u64,

    pub last_run_files_parsed:  u64,
    pub last_run_events_parsed: u64,
    pub last_run_phases_parsed: u64,

    pub finished:               bool,
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self {
            version:                CURRENT_VERSION,
            last_file_parsed:       None,
            file_currently_parsed:  None,
            error_event_id:         None,
            total_files_parsed:     0,
            total_events_parsed:    0,
            total_phases_parsed:    0,
            last_run_files_parsed:  0,
            last_run_events_parsed: 0,
            last_run_phases_parsed: 0,
            finished:               false,
        }
    }
}

impl BatchProgress {
    /// Zero the per-run counters and clear `finished` for a new run.
    pub fn start_run(&mut self) {
        self.last_run_files_parsed  = 0;
        self.last_run_events_parsed = 0;
        self.last_run_phases_parsed = 0;
        self.finished = false;
    }

    pub fn count_file(&mut self) {
        self.total_files_parsed += 1;
        self.last_run_files_parsed += 1;
    }

    pub fn count_event(&mut self) {
        self.total_events_parsed += 1;
        self.last_run_events_parsed += 1;
    }

    pub fn count_phases(&mut self, n: u64) {
        self.total_phases_parsed += n;
        self.last_run_phases_parsed += n;
    }
}

impl StatsFile for BatchProgress {
    const SECTION:   &'static str = "Picking Statistics";
    const FILE_NAME: &'static str = PICKING_STATS_FILE;

    fn version(&self) -> u32 {
        self.version
    }
}

/// Written once per event directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct EventDescription {
    pub version:     u32,
    #[serde(rename = "EventID")]
    pub event_id:    String,
    /// Absent for noise "events".
    pub s_file_path: Option<String>,
    pub magnitude:   Option<f64>,
    pub depth:       Option<f64>,
}

impl StatsFile for EventDescription {
    const SECTION:   &'static str = "Event Description";
    const FILE_NAME: &'static str = EVENT_STATS_FILE;

    fn version(&self) -> u32 {
        self.version
    }
}

/// Written once per pick-group directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PicksDescription {
    pub version:         u32,
    #[serde(rename = "EventID")]
    pub event_id:        String,
    pub s_file_path:     Option<String>,
    pub station:         String,
    pub phase_hint:      String,
    pub magnitude:       Option<f64>,
    pub depth:           Option<f64>,
    pub distance:        Option<f64>,
    pub file_format:     String,
    pub wave_phase_time: Option<DateTime<Utc>>,
    pub wave_start_time: Option<DateTime<Utc>>,
    pub wave_end_time:   Option<DateTime<Utc>>,
}

impl StatsFile for PicksDescription {
    const SECTION:   &'static str = "Picks Description";
    const FILE_NAME: &'static str = PICKS_STATS_FILE;

    fn version(&self) -> u32 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────
// Reading / writing
// ─────────────────────────────────────────────────────────────────────
pub fn stats_path<T: StatsFile>(dir: &Path) -> PathBuf {
    dir.join(T::FILE_NAME)
}

pub fn to_string<T: StatsFile>(record: &T) -> Result<String, StatsError> {
    let body = toml::to_string(record)?;
    Ok(format!("# [{}]\n{}", T::SECTION, body))
}

pub fn from_str<T: StatsFile>(text: &str, path: &Path) -> Result<T, StatsError> {
    let record: T = toml::from_str(text).map_err(|source| StatsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if record.version() != CURRENT_VERSION {
        return Err(StatsError::Version {
            path:     path.to_path_buf(),
            found:    record.version(),
            expected: CURRENT_VERSION,
        });
    }
    Ok(record)
}

/// Write `record` into `dir` atomically (temp file, then rename).
pub fn write_stats<T: StatsFile>(dir: &Path, record: &T) -> Result<PathBuf, StatsError> {
    let path = stats_path::<T>(dir);
    let io_err = |source| StatsError::Io { path: path.clone(), source };

    let text = to_string(record)?;
    let tmp_path = path.with_extension("stats.tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(io_err)?;
        file.write_all(text.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, &path).map_err(io_err)?;

    debug!(path = %path.display(), section = T::SECTION, "stats written");
    Ok(path)
}

pub fn read_stats<T: StatsFile>(dir: &Path) -> Result<T, StatsError> {
    let path = stats_path::<T>(dir);
    let text = fs::read_to_string(&path).map_err(|source| StatsError::Io {
        path: path.clone(),
        source,
    })?;
    from_str(&text, &path)
}

/// Progress of a previous run in `save_dir`, if there was one.
pub fn load_progress(save_dir: &Path) -> Result<Option<BatchProgress>, StatsError> {
    if !stats_path::<BatchProgress>(save_dir).is_file() {
        return Ok(None);
    }
    read_stats(save_dir).map(Some)
}
