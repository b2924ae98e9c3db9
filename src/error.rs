//! Error types for the picking pipeline.
//!
//! Every per-file or per-slice failure maps onto one of the [`PickerError`]
//! kinds; only [`PickerError::FatalConfiguration`] is allowed to stop a run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to read one S-file. The batch reports all of these as
/// "unreadable source file" and moves on.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("value out of range on line {line}: {field}={value}")]
    OutOfRange {
        line:  usize,
        field: &'static str,
        value: String,
    },

    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("file holds {0} events, expected exactly one")]
    MultipleEvents(usize),

    #[error("event ID `{0}` cannot name an output directory")]
    BadEventId(String),
}

/// Archive definitions could not be loaded.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("cannot open definitions file {path}: {source}")]
    Open {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
}

/// miniSEED decoding/encoding failures.
#[derive(Error, Debug)]
pub enum MseedError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("record at offset {offset} is truncated")]
    Truncated { offset: usize },

    #[error("bad record header at offset {offset}: {reason}")]
    BadHeader { offset: usize, reason: String },

    #[error("unsupported data encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("corrupt compressed data: {0}")]
    Steim(String),

    #[error("cannot represent sampling rate {0} Hz in a record header")]
    SamplingRate(f64),

    #[error("trace has no samples")]
    Empty,
}

/// Reading or writing one of the key/value stats files.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path:   PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize stats record: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{path} has schema version {found}, expected {expected}")]
    Version {
        path:     PathBuf,
        found:    u32,
        expected: u32,
    },
}

/// Configuration file problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path:   PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Run-level error taxonomy.
#[derive(Error, Debug)]
pub enum PickerError {
    /// Source file missing, corrupt, or failing to parse.
    #[error("unreadable source file {path}: {source}")]
    SourceUnreadable {
        path:   PathBuf,
        #[source]
        source: SourceError,
    },

    /// Event carries no usable identifier.
    #[error("no event ID found in {0}")]
    IdentityMissing(PathBuf),

    /// A slice, stats or progress write failed.
    #[error("cannot write {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Nothing can be processed with this setup.
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),
}

impl From<CatalogError> for PickerError {
    fn from(e: CatalogError) -> Self {
        PickerError::FatalConfiguration(e.to_string())
    }
}

impl From<ConfigError> for PickerError {
    fn from(e: ConfigError) -> Self {
        PickerError::FatalConfiguration(e.to_string())
    }
}
