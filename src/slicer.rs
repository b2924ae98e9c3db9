//! Slice extraction: windowing policy, cutting archive traces, and the
//! per-station channel ordering applied before anything is saved.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{trace, warn};

use crate::catalog::ArchiveRecord;
use crate::error::MseedError;
use crate::mseed;
use crate::resolver::ArchiveResolver;
use crate::trace::{seconds, Trace};

// ─────────────────────────────────────────────────────────────────────
// Windows
// ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceWindow {
    pub start: DateTime<Utc>,
    pub end:   DateTime<Utc>,
}

impl SliceWindow {
    /// `[pick - pre_offset, pick - pre_offset + duration]`
    pub fn for_pick(pick_time: DateTime<Utc>, pre_offset: f64, duration: f64) -> Self {
        let start = pick_time - seconds(pre_offset);
        Self { start, end: start + seconds(duration) }
    }

    /// `[onset - jitter, onset + duration]`
    pub fn for_trigger(onset: DateTime<Utc>, jitter: Duration, duration: f64) -> Self {
        Self { start: onset - jitter, end: onset + seconds(duration) }
    }
}

/// Whole-second jitter from `[1, max_offset)`; 1 s when the range is empty.
pub fn draw_jitter<R: Rng + ?Sized>(rng: &mut R, max_offset: u32) -> Duration {
    if max_offset <= 1 {
        return Duration::seconds(1);
    }
    Duration::seconds(i64::from(rng.gen_range(1..max_offset)))
}

// ─────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────
/// Every trace in `archive_path` that fully contains `window`, cut to it.
/// Partially covering traces and cuts shorter than `min_samples` are
/// dropped silently.
pub fn extract(archive_path: &Path, window: &SliceWindow, min_samples: usize) -> Result<Vec<Trace>, MseedError> {
    let traces = mseed::read_traces(archive_path)?;
    Ok(cut(&traces, window, min_samples))
}

pub fn cut(traces: &[Trace], window: &SliceWindow, min_samples: usize) -> Vec<Trace> {
    traces
        .iter()
        .filter(|t| t.covers(window.start, window.end))
        .filter_map(|t| t.slice(window.start, window.end))
        .filter(|s| s.len() >= min_samples)
        .collect()
}

/// A cut trace together with the archive it came from.
#[derive(Debug, Clone)]
pub struct ResolvedSlice {
    record:       ArchiveRecord,
    archive_path: PathBuf,
    trace:        Trace,
}

impl ResolvedSlice {
    pub fn new(record: ArchiveRecord, archive_path: PathBuf, trace: Trace) -> Self {
        Self { record, archive_path, trace }
    }

    pub fn record(&self) -> &ArchiveRecord {
        &self.record
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }
}

/// Cut `window` out of every archive of `station` valid at `at`. Missing
/// day files are normal gaps; unreadable ones are logged and skipped.
pub fn slice_station(
    resolver:    &ArchiveResolver,
    station:     &str,
    at:          DateTime<Utc>,
    window:      &SliceWindow,
    min_samples: usize,
) -> Vec<ResolvedSlice> {
    let mut out = Vec::new();
    for (record, path) in resolver.candidate_paths(station, at) {
        if !path.is_file() {
            trace!(path = %path.display(), "no archive file");
            continue;
        }
        match extract(&path, window, min_samples) {
            Ok(traces) => out.extend(
                traces
                    .into_iter()
                    .map(|t| ResolvedSlice::new(record.clone(), path.clone(), t)),
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read archive"),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────
// Ordering
// ─────────────────────────────────────────────────────────────────────
/// Anything that can be grouped by station and channel identity.
pub trait SliceKey {
    fn station(&self) -> &str;
    fn channel_label(&self) -> &str;
}

impl SliceKey for ResolvedSlice {
    fn station(&self) -> &str {
        &self.record.station
    }

    fn channel_label(&self) -> &str {
        &self.record.channel_code
    }
}

impl SliceKey for Trace {
    fn station(&self) -> &str {
        &self.station
    }

    fn channel_label(&self) -> &str {
        &self.channel
    }
}

/// Per station (sorted by name): keep the first slice of each channel
/// identity (last character of the channel label), lay them out in
/// `channel_order`, and drop stations missing any of those channels.
pub fn order_and_dedupe<T: SliceKey>(items: Vec<T>, channel_order: &[char]) -> Vec<T> {
    let mut by_station: BTreeMap<String, Vec<Option<T>>> = BTreeMap::new();

    for item in items {
        let Some(id) = item.channel_label().chars().last() else { continue };
        let Some(pos) = channel_order.iter().position(|c| *c == id) else { continue };

        let slots = by_station
            .entry(item.station().to_string())
            .or_insert_with(|| channel_order.iter().map(|_| None).collect());
        if slots[pos].is_none() {
            slots[pos] = Some(item);
        }
    }

    by_station
        .into_values()
        .filter(|slots| slots.iter().all(Option::is_some))
        .flat_map(|slots| slots.into_iter().flatten())
        .collect()
}
