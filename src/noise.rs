//! Noise picker: slices of continuous archive anchored on STA/LTA
//! triggers rather than catalog picks, labelled `N`.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::catalog::ArchiveRecord;
use crate::config::Config;
use crate::error::PickerError;
use crate::mseed;
use crate::nordic::Phase;
use crate::resolver::ArchiveResolver;
use crate::slicer::{cut, draw_jitter, order_and_dedupe, ResolvedSlice, SliceWindow};
use crate::stats::{EventDescription, PicksDescription, CURRENT_VERSION};
use crate::stations::PickIndex;
use crate::store::{GroupWrite, OutputStore};
use crate::trace::Trace;
use crate::trigger::StaLta;

/// Directory name for the noise "event" of one station and day.
pub fn noise_event_id(station: &str, day: NaiveDate) -> String {
    format!("NOISE.{station}.{:04}.{:03}", day.year(), day.ordinal())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoiseSummary {
    pub days_walked:     u64,
    pub event_days:      u64,
    pub no_trigger:      u64,
    pub near_event:      u64,
    pub groups_saved:    u64,
    pub write_failures:  u64,
}

/// One day archive of a station, already decoded.
struct DayArchive {
    record: ArchiveRecord,
    path:   PathBuf,
    traces: Vec<Trace>,
}

pub struct NoisePicker<'a> {
    config:   &'a Config,
    resolver: &'a ArchiveResolver,
    picks:    &'a PickIndex,
    stations: Vec<String>,
    trigger:  StaLta,
    store:    OutputStore,
}

impl<'a> NoisePicker<'a> {
    pub fn new(
        config:   &'a Config,
        resolver: &'a ArchiveResolver,
        picks:    &'a PickIndex,
        stations: impl IntoIterator<Item = String>,
    ) -> Result<Self, PickerError> {
        let n = &config.noise;
        Ok(Self {
            config,
            resolver,
            picks,
            stations: stations.into_iter().collect(),
            trigger:  StaLta {
                sta_seconds: n.sta_seconds,
                lta_seconds: n.lta_seconds,
                thr_on:      n.trigger_on,
                thr_off:     n.trigger_off,
            },
            store:    OutputStore::open(config.noise_save_dir())?,
        })
    }

    fn load_day(&self, station: &str, at: DateTime<Utc>) -> Vec<DayArchive> {
        let mut out = Vec::new();
        for (record, path) in self.resolver.candidate_paths(station, at) {
            if !path.is_file() {
                continue;
            }
            match mseed::read_traces(&path) {
                Ok(traces) => out.push(DayArchive { record: record.clone(), path, traces }),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot read archive"),
            }
        }
        out
    }

    /// Walk `[start_date, end_date)` until `max_noise_picks` groups are
    /// saved.
    pub fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<NoiseSummary, PickerError> {
        let config = self.config;
        let picks = self.picks;
        let (n, s) = (&config.noise, &config.slicing);
        let stations = self.stations.clone();
        let mut summary = NoiseSummary::default();

        let days = n.start_date.iter_days().take_while(|d| *d < n.end_date);
        'days: for day in days {
            summary.days_walked += 1;
            let Some(midnight) = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc()) else { continue };

            for station in &stations {
                if summary.groups_saved as usize >= n.max_noise_picks {
                    break 'days;
                }
                if n.exclude_event_days && picks.has_pick_on(station, day) {
                    trace!(%station, %day, "event day, skipping");
                    summary.event_days += 1;
                    continue;
                }

                let archives = self.load_day(station, midnight);
                let Some(onset) = archives
                    .iter()
                    .flat_map(|a| a.traces.iter())
                    .find_map(|t| self.trigger.first_onset(t))
                else {
                    summary.no_trigger += 1;
                    continue;
                };

                let jitter = draw_jitter(rng, s.slice_offset);
                let window = SliceWindow::for_trigger(onset, jitter, s.slice_duration);
                if !n.exclude_event_days
                    && picks.has_pick_near(station, window.start, window.end, n.event_tolerance)
                {
                    trace!(%station, %onset, "trigger too close to an event");
                    summary.near_event += 1;
                    continue;
                }

                let slices: Vec<ResolvedSlice> = archives
                    .iter()
                    .flat_map(|a| {
                        cut(&a.traces, &window, s.min_slice_samples)
                            .into_iter()
                            .map(|t| ResolvedSlice::new(a.record.clone(), a.path.clone(), t))
                    })
                    .collect();
                let slices = order_and_dedupe(slices, &s.channel_order);
                if slices.is_empty() {
                    continue;
                }

                let w = self.save(station, day, onset, &window, slices)?;
                summary.write_failures += w.failed as u64;
                if w.written > 0 {
                    summary.groups_saved += 1;
                }
            }

            debug!(%day, saved = summary.groups_saved, "day done");
        }

        info!(
            days = summary.days_walked,
            saved = summary.groups_saved,
            event_days = summary.event_days,
            write_failures = summary.write_failures,
            "noise picking done"
        );
        Ok(summary)
    }

    fn save(
        &mut self,
        station: &str,
        day:     NaiveDate,
        onset:   DateTime<Utc>,
        window:  &SliceWindow,
        slices:  Vec<ResolvedSlice>,
    ) -> Result<GroupWrite, PickerError> {
        let event_id = noise_event_id(station, day);
        let dir = self.store.save_event(&EventDescription {
            version:     CURRENT_VERSION,
            event_id:    event_id.clone(),
            s_file_path: None,
            magnitude:   None,
            depth:       None,
        })?;

        let desc = PicksDescription {
            version:         CURRENT_VERSION,
            event_id,
            s_file_path:     None,
            station:         station.to_string(),
            phase_hint:      Phase::Noise.as_str().to_string(),
            magnitude:       None,
            depth:           None,
            distance:        None,
            file_format:     mseed::FORMAT.to_string(),
            wave_phase_time: Some(onset),
            wave_start_time: Some(window.start),
            wave_end_time:   Some(window.end),
        };
        let traces: Vec<Trace> = slices.into_iter().map(ResolvedSlice::into_trace).collect();
        self.store.save_pick_group(&dir, &desc, &traces)
    }
}
