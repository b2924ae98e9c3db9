//! Nordic (SEISAN S-file) event reader.
//!
//! Only the pieces the pickers need are decoded: the type-1 header (origin
//! time, depth, magnitude), the `ACTION` line carrying the event ID and the
//! phase lines of the pick table. Columns below are 1-based, as in the
//! Nordic format description.

use std::{fs, path::Path};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::trace;

use crate::error::SourceError;
use crate::trace::seconds;

const PICK_TABLE_HEADER: &str = "STAT SP IPHASW";

// ─────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────
/// Phases a slice can be labelled with. Only `P` and `S` come from
/// S-files; `Noise` marks slices anchored on a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    P,
    S,
    Noise,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::P     => "P",
            Phase::S     => "S",
            Phase::Noise => "N",
        }
    }

    /// Phase hint of a pick. Anything other than a bare `P` or `S` is
    /// rejected.
    pub fn from_hint(hint: &str) -> Option<Phase> {
        match hint.trim() {
            "P" => Some(Phase::P),
            "S" => Some(Phase::S),
            _   => None,
        }
    }

    /// Inverse of [`Phase::as_str`].
    pub fn from_label(label: &str) -> Option<Phase> {
        match label {
            "N" => Some(Phase::Noise),
            other => Phase::from_hint(other),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub station:   String,
    pub component: Option<String>,
    /// Phase as written in the file, e.g. `P`, `Sg`, `IAML`.
    pub phase:     String,
    pub time:      DateTime<Utc>,
    /// Epicentral distance in km.
    pub distance:  Option<f64>,
}

impl Pick {
    pub fn phase_hint(&self) -> Option<Phase> {
        Phase::from_hint(&self.phase)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Empty when the file has no `ACTION ... ID:` line.
    pub event_id:         String,
    pub source_file_path: String,
    pub origin_time:      DateTime<Utc>,
    pub magnitude:        Option<f64>,
    pub depth:            Option<f64>,
    pub picks:            Vec<Pick>,
}

// ─────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────
/// Columns `from..=to` (1-based), trimmed. Short lines give what is there.
fn col(line: &str, from: usize, to: usize) -> &str {
    let end = to.min(line.len());
    if from == 0 || from > end {
        return "";
    }
    line.get(from - 1..end).unwrap_or("").trim()
}

fn line_type(line: &str) -> u8 {
    line.as_bytes().get(79).copied().unwrap_or(b' ')
}

fn optional_f64(line: &str, from: usize, to: usize) -> Option<f64> {
    col(line, from, to).parse().ok()
}

fn number<T: std::str::FromStr>(
    line:    &str,
    lineno:  usize,
    from:    usize,
    to:      usize,
    field:   &'static str,
    default: Option<T>,
) -> Result<T, SourceError> {
    let raw = col(line, from, to);
    if raw.is_empty() {
        return default.ok_or_else(|| SourceError::Malformed {
            line:   lineno,
            reason: format!("{field} is blank"),
        });
    }
    raw.parse().map_err(|_| SourceError::Malformed {
        line:   lineno,
        reason: format!("{field} `{raw}` is not a number"),
    })
}

fn out_of_range(lineno: usize, field: &'static str, value: impl ToString) -> SourceError {
    SourceError::OutOfRange { line: lineno, field, value: value.to_string() }
}

// ─────────────────────────────────────────────────────────────────────
// Event ID
// ─────────────────────────────────────────────────────────────────────
/// Event ID from the first `ACTION` line with an `ID:` field, or empty.
pub fn event_id_from_text(text: &str) -> String {
    for line in text.lines() {
        let l = line.trim();
        if l.len() > 73 && l.get(0..6) == Some("ACTION") && l.get(56..59) == Some("ID:") {
            return l.get(59..73).unwrap_or("").trim().to_string();
        }
    }
    String::new()
}

/// IDs become directory names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_usable_event_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn read_event_id(path: &Path) -> Result<String, SourceError> {
    Ok(event_id_from_text(&read_text(path)?))
}

fn read_text(path: &Path) -> Result<String, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Io { path: path.to_path_buf(), source })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ─────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────
struct Header {
    midnight:    DateTime<Utc>,
    origin_time: DateTime<Utc>,
    depth:       Option<f64>,
    magnitude:   Option<f64>,
}

fn parse_header(line: &str, lineno: usize) -> Result<Header, SourceError> {
    let year:   i32 = number(line, lineno, 2, 5, "year", None)?;
    let month:  u32 = number(line, lineno, 7, 8, "month", None)?;
    let day:    u32 = number(line, lineno, 9, 10, "day", None)?;
    let hour:   u32 = number(line, lineno, 12, 13, "hour", Some(0))?;
    let minute: u32 = number(line, lineno, 14, 15, "minute", Some(0))?;
    let second: f64 = number(line, lineno, 17, 20, "second", Some(0.0))?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| out_of_range(lineno, "date", format!("{year:04}-{month:02}-{day:02}")))?;
    if hour > 23 {
        return Err(out_of_range(lineno, "hour", hour));
    }
    if minute > 59 {
        return Err(out_of_range(lineno, "minute", minute));
    }
    if !(0.0..=60.0).contains(&second) {
        return Err(out_of_range(lineno, "second", second));
    }
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| out_of_range(lineno, "date", date))?
        .and_utc();

    Ok(Header {
        midnight,
        origin_time: midnight
            + Duration::hours(i64::from(hour))
            + Duration::minutes(i64::from(minute))
            + seconds(second),
        depth:       optional_f64(line, 39, 43),
        magnitude:   optional_f64(line, 56, 59),
    })
}

fn parse_phase_line(line: &str, lineno: usize, midnight: DateTime<Utc>) -> Result<Option<Pick>, SourceError> {
    let station = col(line, 2, 6);
    if station.is_empty() {
        return Ok(None);
    }
    let hour:   u32 = number(line, lineno, 19, 20, "hour", None)?;
    let minute: u32 = number(line, lineno, 21, 22, "minute", Some(0))?;
    let second: f64 = number(line, lineno, 23, 28, "second", Some(0.0))?;
    if minute > 59 {
        return Err(out_of_range(lineno, "minute", minute));
    }
    if second < 0.0 {
        return Err(out_of_range(lineno, "second", second));
    }

    let component = col(line, 7, 8);
    Ok(Some(Pick {
        station:   station.to_string(),
        component: (!component.is_empty()).then(|| component.to_string()),
        phase:     col(line, 11, 14).to_string(),
        // hours past 23 roll into the next day
        time:      midnight
            + Duration::hours(i64::from(hour))
            + Duration::minutes(i64::from(minute))
            + seconds(second),
        distance:  optional_f64(line, 71, 75),
    }))
}

/// Parse a complete S-file. Exactly one event per file is accepted.
pub fn parse_event(text: &str, source_file_path: &str) -> Result<Event, SourceError> {
    // (1) split into events on blank lines
    let mut blocks: Vec<Vec<(usize, &str)>> = vec![Vec::new()];
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if blocks.last().is_some_and(|b| !b.is_empty()) {
                blocks.push(Vec::new());
            }
        } else if let Some(b) = blocks.last_mut() {
            b.push((i + 1, line));
        }
    }
    let events: Vec<_> = blocks
        .into_iter()
        .filter(|b| b.iter().any(|(_, l)| line_type(l) == b'1'))
        .collect();
    let block = match events.len() {
        0 => return Err(SourceError::MissingAttribute("type-1 header line")),
        1 => &events[0],
        n => return Err(SourceError::MultipleEvents(n)),
    };

    // (2) header, ID and pick table
    let mut header = None;
    let mut in_table = false;
    let mut picks = Vec::new();
    for &(lineno, line) in block {
        if header.is_none() && line_type(line) == b'1' {
            header = Some(parse_header(line, lineno)?);
            continue;
        }
        if line.trim_start().starts_with(PICK_TABLE_HEADER) {
            in_table = true;
            continue;
        }
        if !in_table || !matches!(line_type(line), b' ' | b'4') {
            continue;
        }
        if let Some(h) = &header {
            if let Some(pick) = parse_phase_line(line, lineno, h.midnight)? {
                picks.push(pick);
            }
        }
    }
    let header = header.ok_or(SourceError::MissingAttribute("type-1 header line"))?;

    let block_text: Vec<&str> = block.iter().map(|(_, l)| *l).collect();
    let event_id = event_id_from_text(&block_text.join("\n"));
    trace!(%event_id, picks = picks.len(), "parsed S-file");

    Ok(Event {
        event_id,
        source_file_path: source_file_path.to_string(),
        origin_time:      header.origin_time,
        magnitude:        header.magnitude,
        depth:            header.depth,
        picks,
    })
}

pub fn read_event(path: &Path) -> Result<Event, SourceError> {
    let text = read_text(path)?;
    parse_event(&text, &path.to_string_lossy())
}
