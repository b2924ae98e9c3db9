//! Dataset packer: saved pick groups → one flat CSV table.
//!
//! Each row is `label` followed by every channel's samples, channel by
//! channel in the configured order (`c0_0 .. c0_{n-1}, c1_0 ..`).

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use csv::WriterBuilder;
use glob::glob;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{Config, PackConfig};
use crate::mseed;
use crate::nordic::Phase;
use crate::slicer::{order_and_dedupe, SliceKey};
use crate::stats::{read_stats, stats_path, EventDescription, PicksDescription};

// ─────────────────────────────────────────────────────────────────────
// Pick groups on disk
// ─────────────────────────────────────────────────────────────────────
/// One slice file of a pick group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFile {
    pub station: String,
    pub channel: String,
    pub path:    PathBuf,
}

impl SliceKey for ChannelFile {
    fn station(&self) -> &str {
        &self.station
    }

    fn channel_label(&self) -> &str {
        &self.channel
    }
}

#[derive(Debug, Clone)]
pub struct PickGroup {
    pub dir:   PathBuf,
    pub event: EventDescription,
    pub picks: PicksDescription,
    pub files: Vec<ChannelFile>,
}

/// `loc.station.channel.phase[.n].format` → `(station, channel, format)`.
pub fn parse_slice_file_name(name: &str) -> Option<(&str, &str, &str)> {
    let parts: Vec<&str> = name.split('.').collect();
    match parts.len() {
        5 | 6 => Some((parts[1], parts[2], parts[parts.len() - 1])),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub min_magnitude: Option<f64>,
    pub max_depth:     Option<f64>,
    pub ignore_acc:    bool,
    pub acc_codes:     Vec<String>,
}

impl From<&PackConfig> for GroupFilter {
    fn from(c: &PackConfig) -> Self {
        Self {
            min_magnitude: c.min_magnitude,
            max_depth:     c.max_depth,
            ignore_acc:    c.ignore_acc,
            acc_codes:     c.acc_codes.clone(),
        }
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut v: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("cannot list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    v.sort();
    Ok(v)
}

/// Every pick group of `phase` under `save_dir` that passes `filter`.
/// Directories without readable stats files are skipped.
pub fn read_pick_groups(save_dir: &Path, phase: Phase, filter: &GroupFilter) -> Result<Vec<PickGroup>> {
    let mut groups = Vec::new();

    for event_dir in sorted_subdirs(save_dir)? {
        if !stats_path::<EventDescription>(&event_dir).is_file() {
            continue;
        }
        let event: EventDescription = match read_stats(&event_dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        if let (Some(min), Some(m)) = (filter.min_magnitude, event.magnitude) {
            if m < min {
                continue;
            }
        }
        if let (Some(max), Some(d)) = (filter.max_depth, event.depth) {
            if d > max {
                continue;
            }
        }

        for group_dir in sorted_subdirs(&event_dir)? {
            let picks: PicksDescription = match read_stats(&group_dir) {
                Ok(p) => p,
                Err(e) => {
                    debug!("{e}");
                    continue;
                }
            };
            if picks.phase_hint != phase.as_str() {
                continue;
            }

            let pattern = format!("{}/*.{}", group_dir.display(), picks.file_format);
            let mut paths: Vec<PathBuf> = glob(&pattern)?.filter_map(Result::ok).collect();
            paths.sort();

            let files = paths
                .into_iter()
                .filter_map(|path| {
                    let name = path.file_name()?.to_str()?;
                    let (station, channel, format) = parse_slice_file_name(name)?;
                    if format != picks.file_format {
                        return None;
                    }
                    if filter.ignore_acc && filter.acc_codes.iter().any(|c| c == channel) {
                        return None;
                    }
                    Some(ChannelFile { station: station.to_string(), channel: channel.to_string(), path: path.clone() })
                })
                .collect();

            groups.push(PickGroup { dir: group_dir, event: event.clone(), picks, files });
        }
    }
    Ok(groups)
}

// ─────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────
fn normalize(values: &mut [f64]) {
    let max = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if max > 0.0 {
        values.iter_mut().for_each(|v| *v /= max);
    }
}

/// Samples of one pick group laid out channel by channel, or `None` when a
/// channel is missing, at the wrong rate or too short.
pub fn load_group(group: &PickGroup, cfg: &PackConfig, channel_order: &[char]) -> Option<Vec<f64>> {
    let files = order_and_dedupe(group.files.clone(), channel_order);
    if files.len() != channel_order.len() {
        debug!(group = %group.dir.display(), "incomplete channel set");
        return None;
    }

    let len = cfg.required_trace_length;
    let mut row = Vec::with_capacity(len * files.len());
    for f in &files {
        let traces = match mseed::read_traces(&f.path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %f.path.display(), error = %e, "cannot read slice");
                return None;
            }
        };
        let tr = traces.into_iter().next()?;
        if (tr.sampling_rate - cfg.required_sampling_rate).abs() > 1e-6 || tr.len() < len {
            debug!(path = %f.path.display(), rate = tr.sampling_rate, samples = tr.len(), "unsuitable slice");
            return None;
        }
        let mut channel = tr.samples;
        channel.truncate(len);
        if cfg.normalize && !cfg.global_max_normalizing {
            normalize(&mut channel);
        }
        row.extend(channel);
    }
    if cfg.normalize && cfg.global_max_normalizing {
        normalize(&mut row);
    }
    Some(row)
}

fn load_rows(groups: &[PickGroup], cfg: &PackConfig, channel_order: &[char]) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = groups
        .par_iter()
        .filter_map(|g| load_group(g, cfg, channel_order))
        .collect();
    if cfg.max_per_class > 0 {
        rows.truncate(cfg.max_per_class);
    }
    rows
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub p_rows:     usize,
    pub s_rows:     usize,
    pub noise_rows: usize,
    pub skipped:    usize,
}

pub fn header(channels: usize, len: usize) -> Vec<String> {
    std::iter::once("label".to_string())
        .chain((0..channels).flat_map(|c| (0..len).map(move |t| format!("c{c}_{t}"))))
        .collect()
}

/// Load P, S and noise groups and write them into `pack.output`.
pub fn pack(config: &Config) -> Result<PackSummary> {
    let cfg = &config.pack;
    let order = &config.slicing.channel_order;
    let filter = GroupFilter::from(cfg);

    let mut classes: Vec<(u32, Vec<PickGroup>)> = Vec::new();
    for (phase, label, dirs) in [
        (Phase::P,     cfg.p_label,     config.pack_picks_dirs()),
        (Phase::S,     cfg.s_label,     config.pack_picks_dirs()),
        (Phase::Noise, cfg.noise_label, config.pack_noise_dirs()),
    ] {
        let mut groups = Vec::new();
        for dir in &dirs {
            if !dir.is_dir() {
                warn!(%phase, dir = %dir.display(), "pick group directory does not exist, skipping");
                continue;
            }
            groups.extend(
                read_pick_groups(dir, phase, &filter)
                    .with_context(|| format!("reading {phase} groups from {}", dir.display()))?,
            );
        }
        info!(%phase, groups = groups.len(), "pick groups found");
        classes.push((label, groups));
    }

    let file = File::create(&cfg.output).with_context(|| format!("cannot create {}", cfg.output.display()))?;
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(BufWriter::new(file));
    wtr.write_record(header(order.len(), cfg.required_trace_length))?;

    let mut summary = PackSummary::default();
    for (i, (label, groups)) in classes.iter().enumerate() {
        let rows = load_rows(groups, cfg, order);
        summary.skipped += groups.len().saturating_sub(rows.len());
        match i {
            0 => summary.p_rows = rows.len(),
            1 => summary.s_rows = rows.len(),
            _ => summary.noise_rows = rows.len(),
        }
        for row in rows {
            let record = std::iter::once(label.to_string()).chain(row.iter().map(|v| v.to_string()));
            wtr.write_record(record)?;
        }
    }
    wtr.flush()?;

    info!(
        p = summary.p_rows,
        s = summary.s_rows,
        noise = summary.noise_rows,
        skipped = summary.skipped,
        output = %cfg.output.display(),
        "dataset written"
    );
    Ok(summary)
}
