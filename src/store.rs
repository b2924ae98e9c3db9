//! Output layout under the save directory.
//!
//! ```text
//! save_dir/
//!   picking.stats
//!   <event_id>[_n]/
//!     event.stats
//!     <station>.<phase>.<n>/
//!       picks.stats
//!       <location>.<station>.<channel>.<phase>[.<n>].MSEED
//! ```

use std::{
    collections::HashSet,
    fs,
    path::{Component, Path, PathBuf},
};

use tracing::{debug, trace, warn};

use crate::error::PickerError;
use crate::mseed;
use crate::stats::{read_stats, write_stats, EventDescription, PicksDescription, EVENT_STATS_FILE};
use crate::trace::Trace;

/// An event counts as done once its directory holds `event.stats`.
pub fn event_exists(event_dir: &Path) -> bool {
    event_dir.is_dir() && event_dir.join(EVENT_STATS_FILE).is_file()
}

fn persistence(path: &Path, reason: impl ToString) -> PickerError {
    PickerError::Persistence { path: path.to_path_buf(), reason: reason.to_string() }
}

/// `name` is a single plain path component, so `root.join(name)` stays a
/// direct child of `root`.
fn is_child_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None))
}

/// The directory holds nothing another source file wrote: either no
/// finished event at all, or one whose `SFilePath` is `source`.
fn owned_by(dir: &Path, source: Option<&str>) -> bool {
    match read_stats::<EventDescription>(dir) {
        Ok(ev) => ev.s_file_path.as_deref() == source,
        Err(_) => !event_exists(dir),
    }
}

/// Slice file name inside a pick group.
pub fn slice_file_name(tr: &Trace, phase: &str, index: Option<usize>) -> String {
    let base = format!("{}.{}.{}.{}", tr.location, tr.station, tr.channel, phase);
    match index {
        Some(n) => format!("{base}.{n}.{}", mseed::FORMAT),
        None    => format!("{base}.{}", mseed::FORMAT),
    }
}

/// First `<station>.<phase>.<n>` directory name not yet taken.
fn free_group_dir(event_dir: &Path, station: &str, phase: &str) -> PathBuf {
    (0..)
        .map(|n| event_dir.join(format!("{station}.{phase}.{n}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| event_dir.join(format!("{station}.{phase}")))
}

/// Slice files of one pick group that made it to disk, and those that did
/// not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupWrite {
    pub written: usize,
    pub failed:  usize,
}

/// Writes event and pick-group directories, handing out event directory
/// names so that one run never writes two events into the same place and
/// no run replaces another source file's output.
#[derive(Debug)]
pub struct OutputStore {
    root:         PathBuf,
    claimed_ids:  HashSet<String>,
    claimed_dirs: HashSet<String>,
}

impl OutputStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PickerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PickerError::FatalConfiguration(format!("cannot create save dir {}: {e}", root.display()))
        })?;
        Ok(Self { root, claimed_ids: HashSet::new(), claimed_dirs: HashSet::new() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn event_dir(&self, event_id: &str) -> PathBuf {
        self.root.join(event_id)
    }

    pub fn event_exists(&self, event_id: &str) -> bool {
        is_child_name(event_id) && event_exists(&self.event_dir(event_id))
    }

    /// True when `event_id` already received a directory in this run.
    pub fn claimed_in_run(&self, event_id: &str) -> bool {
        self.claimed_ids.contains(event_id)
    }

    /// Fresh directory for the event of `source`. Candidates are
    /// `<event_id>`, `<event_id>_1`, `<event_id>_2`, ... The first one not
    /// handed out in this run and either absent or left by `source` itself
    /// is taken; previous output of `source` there is removed.
    pub fn claim_event_dir(&mut self, event_id: &str, source: Option<&str>) -> Result<PathBuf, PickerError> {
        if !is_child_name(event_id) {
            return Err(persistence(&self.root.join(event_id), "event ID is not a plain directory name"));
        }

        let name = (0usize..)
            .map(|n| if n == 0 { event_id.to_string() } else { format!("{event_id}_{n}") })
            .find(|name| {
                if self.claimed_dirs.contains(name) {
                    return false;
                }
                let dir = self.root.join(name);
                let free = !dir.exists() || owned_by(&dir, source);
                if !free {
                    trace!(dir = %dir.display(), "belongs to another source file");
                }
                free
            })
            .ok_or_else(|| persistence(&self.root, format!("no free directory for {event_id}")))?;

        let dir = self.root.join(&name);
        if dir.exists() {
            debug!(dir = %dir.display(), "replacing previous output");
            fs::remove_dir_all(&dir).map_err(|e| persistence(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| persistence(&dir, e))?;

        self.claimed_ids.insert(event_id.to_string());
        self.claimed_dirs.insert(name);
        Ok(dir)
    }

    /// Claim a directory for the event and write its `event.stats`.
    pub fn save_event(&mut self, desc: &EventDescription) -> Result<PathBuf, PickerError> {
        let dir = self.claim_event_dir(&desc.event_id, desc.s_file_path.as_deref())?;
        write_stats(&dir, desc).map_err(|e| persistence(&dir, e))?;
        Ok(dir)
    }

    /// Write one pick group: `picks.stats` plus one file per slice. Slice
    /// write failures are logged and counted; a group left without any
    /// slice file is removed again.
    pub fn save_pick_group(
        &self,
        event_dir: &Path,
        desc:      &PicksDescription,
        slices:    &[Trace],
    ) -> Result<GroupWrite, PickerError> {
        let group_dir = free_group_dir(event_dir, &desc.station, &desc.phase_hint);
        fs::create_dir_all(&group_dir).map_err(|e| persistence(&group_dir, e))?;
        write_stats(&group_dir, desc).map_err(|e| persistence(&group_dir, e))?;

        let mut result = GroupWrite::default();
        for tr in slices {
            let mut path = group_dir.join(slice_file_name(tr, &desc.phase_hint, None));
            let mut n = 1;
            while path.exists() {
                path = group_dir.join(slice_file_name(tr, &desc.phase_hint, Some(n)));
                n += 1;
            }
            match mseed::write_trace(&path, tr) {
                Ok(()) => result.written += 1,
                Err(e) => {
                    warn!("{}", persistence(&path, e));
                    result.failed += 1;
                }
            }
        }

        if result.written == 0 {
            if let Err(e) = fs::remove_dir_all(&group_dir) {
                debug!(group = %group_dir.display(), error = %e, "cannot remove empty group");
            }
        }
        debug!(group = %group_dir.display(), written = result.written, failed = result.failed, "pick group saved");
        Ok(result)
    }
}
