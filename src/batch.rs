//! Resumable phase-picking run over an S-file tree.
//!
//! `LOADING_PROGRESS -> (FRESH | RESUMING) -> PROCESSING_FILE* -> FINISHED`.
//! Progress is persisted before and after every file; a progress file that
//! still names a file in flight means the previous run died there, and that
//! file is reprocessed no matter what output already exists for it.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{PickerError, SourceError};
use crate::nordic::{self, Event};
use crate::resolver::ArchiveResolver;
use crate::slicer::{order_and_dedupe, slice_station, ResolvedSlice, SliceWindow};
use crate::stats::{load_progress, write_stats, BatchProgress, EventDescription, PicksDescription, CURRENT_VERSION};
use crate::store::OutputStore;
use crate::trace::Trace;
use crate::mseed;

// ─────────────────────────────────────────────────────────────────────
// Source discovery
// ─────────────────────────────────────────────────────────────────────
/// Every file under `root`, depth first, sorted by name within a directory.
pub fn discover_source_files(root: &Path) -> Result<Vec<PathBuf>, PickerError> {
    if !root.is_dir() {
        return Err(PickerError::FatalConfiguration(format!(
            "S-file directory {} does not exist",
            root.display()
        )));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "cannot walk S-file tree"),
        }
    }
    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────
// Run state
// ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// No progress file, or the last run finished.
    Fresh,
    /// The last run stopped early; what it was working on gets redone.
    Resuming {
        file:     Option<PathBuf>,
        event_id: Option<String>,
    },
}

/// What happened to one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Output exists and rewriting is off.
    Skipped,
    /// Rejected by the magnitude/depth filters.
    Filtered,
    /// Event saved without pick groups.
    NoPicks,
    /// `failed` counts group and slice writes that did not reach disk.
    Saved { groups: usize, failed: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_seen:           u64,
    pub events_saved:         u64,
    pub events_skipped:       u64,
    pub events_filtered:      u64,
    pub no_picks:             u64,
    pub groups_saved:         u64,
    pub unreadable:           u64,
    pub identity_missing:     u64,
    pub persistence_failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Skipped  => self.events_skipped += 1,
            FileOutcome::Filtered => self.events_filtered += 1,
            FileOutcome::NoPicks  => {
                self.events_saved += 1;
                self.no_picks += 1;
            }
            FileOutcome::Saved { groups, failed } => {
                self.events_saved += 1;
                self.groups_saved += groups as u64;
                self.persistence_failures += failed as u64;
            }
        }
    }

    fn record_error(&mut self, e: &PickerError) {
        match e {
            PickerError::SourceUnreadable { .. } => self.unreadable += 1,
            PickerError::IdentityMissing(_)      => self.identity_missing += 1,
            PickerError::Persistence { .. }      => self.persistence_failures += 1,
            PickerError::FatalConfiguration(_)   => {}
        }
    }
}

fn unreadable(path: &Path) -> impl FnOnce(SourceError) -> PickerError + '_ {
    move |source| PickerError::SourceUnreadable { path: path.to_path_buf(), source }
}

/// Keep events at or above `min_magnitude` and no deeper than `max_depth`.
/// Unknown values pass.
pub fn event_passes(event: &Event, min_magnitude: Option<f64>, max_depth: Option<f64>) -> bool {
    let mag_ok   = match (min_magnitude, event.magnitude) {
        (Some(min), Some(m)) => m >= min,
        _ => true,
    };
    let depth_ok = match (max_depth, event.depth) {
        (Some(max), Some(d)) => d <= max,
        _ => true,
    };
    mag_ok && depth_ok
}

// ─────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────
pub struct BatchDriver<'a> {
    config:   &'a Config,
    resolver: &'a ArchiveResolver,
    store:    OutputStore,
    progress: BatchProgress,
    mode:     StartMode,
    rewrite:  bool,
}

impl<'a> BatchDriver<'a> {
    /// Load progress from the save directory and settle the start mode.
    /// An unreadable progress file is fatal: guessing would risk both
    /// duplicates and lost events.
    pub fn new(config: &'a Config, resolver: &'a ArchiveResolver) -> Result<Self, PickerError> {
        let store = OutputStore::open(&config.save_dir)?;
        let previous = load_progress(&config.save_dir)
            .map_err(|e| PickerError::FatalConfiguration(e.to_string()))?;

        let (mut progress, mode) = match previous {
            None => {
                info!("no picking statistics found, starting anew");
                (BatchProgress::default(), StartMode::Fresh)
            }
            Some(p) if p.finished => (p, StartMode::Fresh),
            Some(p) => {
                let mode = StartMode::Resuming {
                    file:     p.file_currently_parsed.clone(),
                    event_id: p.error_event_id.clone(),
                };
                info!(?mode, "previous run did not finish, resuming");
                (p, mode)
            }
        };

        let resuming = matches!(mode, StartMode::Resuming { .. });
        let rewrite = if config.batch.explicit_rewrite_duplicates {
            true
        } else {
            config.batch.rewrite_duplicates && !resuming
        };

        progress.start_run();
        progress.file_currently_parsed = None;
        progress.error_event_id = None;

        Ok(Self { config, resolver, store, progress, mode, rewrite })
    }

    pub fn mode(&self) -> &StartMode {
        &self.mode
    }

    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    fn persist(&self) -> Result<(), PickerError> {
        write_stats(&self.config.save_dir, &self.progress)
            .map(|_| ())
            .map_err(|e| PickerError::Persistence {
                path:   self.config.save_dir.clone(),
                reason: e.to_string(),
            })
    }

    fn persist_or_warn(&self, summary: &mut RunSummary) {
        if let Err(e) = self.persist() {
            warn!("{e}");
            summary.record_error(&e);
        }
    }

    fn should_process(&self, file: &Path, event_id: &str) -> bool {
        if self.rewrite {
            return true;
        }
        if let StartMode::Resuming { file: f, event_id: id } = &self.mode {
            if f.as_deref() == Some(file) || id.as_deref() == Some(event_id) {
                return true;
            }
        }
        // a second file with an ID already written in this run
        if self.store.claimed_in_run(event_id) {
            return true;
        }
        !self.store.event_exists(event_id)
    }

    /// Visit every file, in order. Only a fatal configuration error stops
    /// the run.
    pub fn run(&mut self, files: &[PathBuf]) -> Result<RunSummary, PickerError> {
        let mut summary = RunSummary::default();
        let heartbeat = self.config.batch.heartbeat_every;

        for (i, file) in files.iter().enumerate() {
            // 1. crash marker
            self.progress.file_currently_parsed = Some(file.clone());
            self.progress.error_event_id = None;
            self.persist_or_warn(&mut summary);

            // 2. the file itself
            match self.process_file(file, &mut summary) {
                Ok(outcome) => {
                    trace!(file = %file.display(), ?outcome, "file done");
                    summary.record(outcome);
                }
                Err(e @ PickerError::FatalConfiguration(_)) => return Err(e),
                Err(e) => {
                    warn!("{e}");
                    summary.record_error(&e);
                }
            }

            // 3. clear the marker, count, persist
            self.progress.last_file_parsed = self.progress.file_currently_parsed.take();
            self.progress.error_event_id = None;
            self.progress.count_file();
            summary.files_seen += 1;
            self.persist_or_warn(&mut summary);

            if heartbeat > 0 && ((i as u64 + 1) % heartbeat == 0 || i + 1 == files.len()) {
                info!(
                    "[{}]  file {}/{}  ({} events saved, {} pick groups)",
                    Local::now().format("%H:%M:%S"),
                    i + 1,
                    files.len(),
                    summary.events_saved,
                    summary.groups_saved,
                );
            }
        }

        self.progress.finished = true;
        self.persist_or_warn(&mut summary);
        Ok(summary)
    }

    fn process_file(&mut self, file: &Path, summary: &mut RunSummary) -> Result<FileOutcome, PickerError> {
        if !file.is_file() {
            return Err(unreadable(file)(SourceError::Io {
                path:   file.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            }));
        }

        let event_id = nordic::read_event_id(file).map_err(unreadable(file))?;
        if event_id.is_empty() {
            return Err(PickerError::IdentityMissing(file.to_path_buf()));
        }
        if !nordic::is_usable_event_id(&event_id) {
            return Err(unreadable(file)(SourceError::BadEventId(event_id)));
        }
        self.progress.error_event_id = Some(event_id.clone());
        self.persist_or_warn(summary);

        if !self.should_process(file, &event_id) {
            debug!(%event_id, "output exists, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let event = nordic::read_event(file).map_err(unreadable(file))?;
        self.progress.count_event();

        let s = &self.config.slicing;
        if !event_passes(&event, s.min_magnitude, s.max_depth) {
            debug!(%event_id, magnitude = ?event.magnitude, depth = ?event.depth, "event filtered");
            return Ok(FileOutcome::Filtered);
        }

        let groups = self.collect_groups(&event, &event_id);
        let event_dir = self.store.save_event(&EventDescription {
            version:     CURRENT_VERSION,
            event_id:    event_id.clone(),
            s_file_path: Some(event.source_file_path.clone()),
            magnitude:   event.magnitude,
            depth:       event.depth,
        })?;

        if groups.is_empty() {
            debug!(%event_id, picks = event.picks.len(), "no usable picks");
            return Ok(FileOutcome::NoPicks);
        }

        let (mut saved, mut failed) = (0, 0);
        for (desc, traces) in &groups {
            match self.store.save_pick_group(&event_dir, desc, traces) {
                Ok(w) => {
                    failed += w.failed;
                    if w.written > 0 {
                        saved += 1;
                    } else {
                        warn!(%event_id, station = %desc.station, phase = %desc.phase_hint, "no slice of the group could be written");
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    failed += 1;
                }
            }
        }
        self.progress.count_phases(saved as u64);
        Ok(FileOutcome::Saved { groups: saved, failed })
    }

    /// One pick group per usable pick: phase and distance gates, archive
    /// resolution, cutting and channel ordering.
    fn collect_groups(&self, event: &Event, event_id: &str) -> Vec<(PicksDescription, Vec<Trace>)> {
        let s = &self.config.slicing;
        let mut groups = Vec::new();

        for pick in &event.picks {
            let Some(phase) = pick.phase_hint() else {
                trace!(station = %pick.station, phase = %pick.phase, "neither P nor S, skipping");
                continue;
            };
            if let (Some(max), Some(d)) = (s.max_distance, pick.distance) {
                if d > max {
                    trace!(station = %pick.station, distance = d, "too far, skipping");
                    continue;
                }
            }

            let window = SliceWindow::for_pick(pick.time, s.static_slice_offset, s.slice_duration);
            let slices = slice_station(self.resolver, &pick.station, pick.time, &window, s.min_slice_samples);
            let slices = order_and_dedupe(slices, &s.channel_order);
            if slices.is_empty() {
                trace!(station = %pick.station, time = %pick.time, "no coverage");
                continue;
            }

            let desc = PicksDescription {
                version:         CURRENT_VERSION,
                event_id:        event_id.to_string(),
                s_file_path:     Some(event.source_file_path.clone()),
                station:         pick.station.clone(),
                phase_hint:      phase.as_str().to_string(),
                magnitude:       event.magnitude,
                depth:           event.depth,
                distance:        pick.distance,
                file_format:     mseed::FORMAT.to_string(),
                wave_phase_time: Some(pick.time),
                wave_start_time: Some(window.start),
                wave_end_time:   Some(window.end),
            };
            groups.push((desc, slices.into_iter().map(ResolvedSlice::into_trace).collect()));
        }
        groups
    }
}
