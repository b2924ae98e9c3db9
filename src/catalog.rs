//! Archive catalog: `ARC_CHAN` lines of a SEISAN definitions file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::error::CatalogError;

/// One continuous-archive channel and the period it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub station:           String,
    pub channel_code:      String,
    pub subdirectory_code: String,
    pub location_code:     String,
    pub valid_from:        DateTime<Utc>,
    /// `None` while the archive is still being recorded.
    pub valid_until:       Option<DateTime<Utc>>,
}

impl ArchiveRecord {
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        t >= self.valid_from && self.valid_until.map_or(true, |end| t <= end)
    }
}

/// `YYYYMMDD`, `YYYYMMDDHHmm` or `YYYYMMDDHHmmss`, always UTC.
pub fn parse_date_token(token: &str) -> Option<DateTime<Utc>> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let full = match token.len() {
        8  => format!("{token}000000"),
        12 => format!("{token}00"),
        14 => token.to_string(),
        _  => return None,
    };
    let naive = NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn fixed(token: &str, from: usize, to: usize) -> String {
    let to = to.min(token.len());
    if from >= to {
        return String::new();
    }
    token.get(from..to).unwrap_or("").trim().to_string()
}

/// Parse a single line; anything that is not a well-formed `ARC_CHAN`
/// definition yields `None`.
///
/// The code token is fixed width: channel `[0,3)`, subdirectory `[3,5)`,
/// location `[5,7)`.
pub fn parse_definition_line(line: &str) -> Option<ArchiveRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if !matches!(tokens.len(), 4 | 5) || tokens[0] != "ARC_CHAN" {
        return None;
    }

    let code = tokens[2];
    let valid_from  = parse_date_token(tokens[3])?;
    let valid_until = tokens.get(4).and_then(|t| parse_date_token(t));

    Some(ArchiveRecord {
        station:           tokens[1].to_string(),
        channel_code:      fixed(code, 0, 3),
        subdirectory_code: fixed(code, 3, 5),
        location_code:     fixed(code, 5, 7),
        valid_from,
        valid_until,
    })
}

pub fn parse_definitions(text: &str) -> Vec<ArchiveRecord> {
    text.lines().filter_map(parse_definition_line).collect()
}

pub fn read_definitions(path: &Path) -> Result<Vec<ArchiveRecord>, CatalogError> {
    let bytes = fs::read(path).map_err(|source| CatalogError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_definitions(&String::from_utf8_lossy(&bytes));
    debug!(path = %path.display(), records = records.len(), "archive definitions loaded");
    Ok(records)
}

/// Concatenate the records of several definitions files, in the order given.
pub fn read_all_definitions(paths: &[PathBuf]) -> Result<Vec<ArchiveRecord>, CatalogError> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(read_definitions(path)?);
    }
    Ok(all)
}
