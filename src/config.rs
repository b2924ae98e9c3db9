//! Run configuration.
//!
//! Built once from defaults, an optional TOML file and then command line
//! overrides; afterwards it is only ever passed around by reference.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────
const DEFAULT_REA_PATH:        &str = "/seismo/seisan/REA/IMGG_";
const DEFAULT_DEFINITIONS:     &str = "/seismo/seisan/DAT/SEISAN.DEF";
const DEFAULT_ARCHIVES_PATH:   &str = "/seismo/archive";
const DEFAULT_SAVE_DIR:        &str = "./picks";
const DEFAULT_OUTPUT_LEVEL:    u8   = 2;
const DEFAULT_SLICE_DURATION:  f64  = 4.0;
const DEFAULT_STATIC_OFFSET:   f64  = 2.0;
const DEFAULT_SLICE_OFFSET:    u32  = 5;
const DEFAULT_MIN_SAMPLES:     usize = 400;
const DEFAULT_HEARTBEAT_EVERY: u64  = 100;
const DEFAULT_MAX_NOISE_PICKS: usize = 100;
const DEFAULT_EVENT_TOLERANCE: f64  = 15.0;
const DEFAULT_REQUIRED_DF:     f64  = 100.0;
const DEFAULT_TRACE_LENGTH:    usize = 400;

fn default_channel_order() -> Vec<char> {
    vec!['N', 'E', 'Z']
}

// ─────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the S-file tree (`REA/<db>`).
    pub rea_path:      PathBuf,
    /// `SEISAN.DEF` files holding `ARC_CHAN` lines, read in order.
    pub definitions:   Vec<PathBuf>,
    pub archives_path: PathBuf,
    pub save_dir:      PathBuf,
    /// 0 (errors only) .. 5 (everything).
    pub output_level:  u8,
    pub slicing:       SlicingConfig,
    pub batch:         BatchConfig,
    pub noise:         NoiseConfig,
    pub pack:          PackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rea_path:      PathBuf::from(DEFAULT_REA_PATH),
            definitions:   vec![PathBuf::from(DEFAULT_DEFINITIONS)],
            archives_path: PathBuf::from(DEFAULT_ARCHIVES_PATH),
            save_dir:      PathBuf::from(DEFAULT_SAVE_DIR),
            output_level:  DEFAULT_OUTPUT_LEVEL,
            slicing:       SlicingConfig::default(),
            batch:         BatchConfig::default(),
            noise:         NoiseConfig::default(),
            pack:          PackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlicingConfig {
    /// Seconds per slice.
    pub slice_duration:      f64,
    /// Seconds a pick window starts before the pick.
    pub static_slice_offset: f64,
    /// Upper bound (exclusive, whole seconds) of the noise window jitter.
    pub slice_offset:        u32,
    /// Channel identities every saved station must supply, in output order.
    pub channel_order:       Vec<char>,
    pub min_slice_samples:   usize,
    /// Picks farther than this (km) are skipped.
    pub max_distance:        Option<f64>,
    /// Events below this magnitude are skipped.
    pub min_magnitude:       Option<f64>,
    /// Events deeper than this (km) are skipped.
    pub max_depth:           Option<f64>,
}

impl Default for SlicingConfig {
    fn default() -> Self {
        Self {
            slice_duration:      DEFAULT_SLICE_DURATION,
            static_slice_offset: DEFAULT_STATIC_OFFSET,
            slice_offset:        DEFAULT_SLICE_OFFSET,
            channel_order:       default_channel_order(),
            min_slice_samples:   DEFAULT_MIN_SAMPLES,
            max_distance:        None,
            min_magnitude:       None,
            max_depth:           None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Reprocess events whose output already exists.
    pub rewrite_duplicates:          bool,
    /// Keep `rewrite_duplicates` even when resuming an interrupted run.
    pub explicit_rewrite_duplicates: bool,
    /// Log a progress line every N files (0 disables).
    pub heartbeat_every:             u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rewrite_duplicates:          false,
            explicit_rewrite_duplicates: false,
            heartbeat_every:             DEFAULT_HEARTBEAT_EVERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseConfig {
    /// Defaults to the top-level `save_dir`.
    pub save_dir:             Option<PathBuf>,
    /// Station list to pick from; generated from the S-files when unset.
    pub stations_load_path:   Option<PathBuf>,
    pub stations_save_path:   Option<PathBuf>,
    pub start_date:           NaiveDate,
    /// Exclusive.
    pub end_date:             NaiveDate,
    pub max_noise_picks:      usize,
    /// Skip whole days on which the station recorded an event pick.
    pub exclude_event_days:   bool,
    /// Otherwise keep this many seconds between a noise window and any pick.
    pub event_tolerance:      f64,
    pub sta_seconds:          f64,
    pub lta_seconds:          f64,
    pub trigger_on:           f64,
    pub trigger_off:          f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            save_dir:           None,
            stations_load_path: None,
            stations_save_path: None,
            start_date:         NaiveDate::from_ymd_opt(2014, 1, 1).unwrap_or(NaiveDate::MIN),
            end_date:           NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or(NaiveDate::MAX),
            max_noise_picks:    DEFAULT_MAX_NOISE_PICKS,
            exclude_event_days: true,
            event_tolerance:    DEFAULT_EVENT_TOLERANCE,
            sta_seconds:        2.5,
            lta_seconds:        10.0,
            trigger_on:         3.5,
            trigger_off:        0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    /// Directories holding P/S pick groups; default to `save_dir`.
    pub picks_dirs:             Vec<PathBuf>,
    /// Directories holding noise groups; default to the noise save dir.
    pub noise_dirs:             Vec<PathBuf>,
    pub output:                 PathBuf,
    pub required_sampling_rate: f64,
    pub required_trace_length:  usize,
    /// Normalize by one maximum over all channels of a row instead of per
    /// channel.
    pub global_max_normalizing: bool,
    pub normalize:              bool,
    pub min_magnitude:          Option<f64>,
    pub max_depth:              Option<f64>,
    pub ignore_acc:             bool,
    /// Channel codes treated as accelerometers.
    pub acc_codes:              Vec<String>,
    pub p_label:                u32,
    pub s_label:                u32,
    pub noise_label:            u32,
    /// Rows per class; 0 keeps everything.
    pub max_per_class:          usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            picks_dirs:             Vec::new(),
            noise_dirs:             Vec::new(),
            output:                 PathBuf::from("dataset.csv"),
            required_sampling_rate: DEFAULT_REQUIRED_DF,
            required_trace_length:  DEFAULT_TRACE_LENGTH,
            global_max_normalizing: true,
            normalize:              true,
            min_magnitude:          None,
            max_depth:              None,
            ignore_acc:             true,
            acc_codes:              vec!["ENE".into(), "ENN".into(), "ENZ".into()],
            p_label:                0,
            s_label:                1,
            noise_label:            2,
            max_per_class:          0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────
impl Config {
    /// Defaults, overlaid by the TOML file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn noise_save_dir(&self) -> &Path {
        self.noise.save_dir.as_deref().unwrap_or(&self.save_dir)
    }

    pub fn pack_picks_dirs(&self) -> Vec<PathBuf> {
        if self.pack.picks_dirs.is_empty() {
            vec![self.save_dir.clone()]
        } else {
            self.pack.picks_dirs.clone()
        }
    }

    pub fn pack_noise_dirs(&self) -> Vec<PathBuf> {
        if self.pack.noise_dirs.is_empty() {
            vec![self.noise_save_dir().to_path_buf()]
        } else {
            self.pack.noise_dirs.clone()
        }
    }

    /// Reject settings no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.slicing;
        if !(s.slice_duration > 0.0) {
            return Err(ConfigError::Invalid(format!("slice_duration must be positive, got {}", s.slice_duration)));
        }
        if s.static_slice_offset < 0.0 {
            return Err(ConfigError::Invalid("static_slice_offset must not be negative".into()));
        }
        if s.channel_order.is_empty() {
            return Err(ConfigError::Invalid("channel_order is empty".into()));
        }
        if self.output_level > 5 {
            return Err(ConfigError::Invalid(format!("output_level {} is outside 0..=5", self.output_level)));
        }
        let n = &self.noise;
        if n.end_date <= n.start_date {
            return Err(ConfigError::Invalid(format!("noise end date {} is not after {}", n.end_date, n.start_date)));
        }
        if !(n.sta_seconds > 0.0 && n.lta_seconds > n.sta_seconds) {
            return Err(ConfigError::Invalid("STA window must be positive and shorter than LTA".into()));
        }
        if self.pack.required_trace_length == 0 {
            return Err(ConfigError::Invalid("required_trace_length must be positive".into()));
        }
        Ok(())
    }
}
