//! Recursive STA/LTA trigger used to anchor noise windows.

use chrono::{DateTime, Duration, Utc};

use crate::trace::Trace;

/// Recursive STA/LTA characteristic function. `nsta` and `nlta` are window
/// lengths in samples; the first `nlta` values are zeroed while the long
/// average warms up.
pub fn recursive_sta_lta(samples: &[f64], nsta: usize, nlta: usize) -> Vec<f64> {
    let csta = 1.0 / nsta.max(1) as f64;
    let clta = 1.0 / nlta.max(1) as f64;
    let (mut sta, mut lta) = (0.0, 1e-99);

    let mut cft: Vec<f64> = samples
        .iter()
        .map(|x| {
            let sq = x * x;
            sta = csta * sq + (1.0 - csta) * sta;
            lta = clta * sq + (1.0 - clta) * lta;
            sta / lta
        })
        .collect();
    let warmup = nlta.min(cft.len());
    cft[..warmup].fill(0.0);
    cft
}

/// `(on, off)` sample index pairs: on when the function rises above
/// `thr_on`, off when it drops below `thr_off`. A trigger still active at
/// the end closes on the last sample.
pub fn trigger_onset(cft: &[f64], thr_on: f64, thr_off: f64) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut on = None;
    for (i, &v) in cft.iter().enumerate() {
        match on {
            None if v > thr_on => on = Some(i),
            Some(start) if v < thr_off => {
                out.push((start, i));
                on = None;
            }
            _ => {}
        }
    }
    if let Some(start) = on {
        out.push((start, cft.len() - 1));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaLta {
    pub sta_seconds: f64,
    pub lta_seconds: f64,
    pub thr_on:      f64,
    pub thr_off:     f64,
}

impl Default for StaLta {
    fn default() -> Self {
        Self { sta_seconds: 2.5, lta_seconds: 10.0, thr_on: 3.5, thr_off: 0.5 }
    }
}

impl StaLta {
    /// Start of the trace plus the whole seconds to its first trigger.
    pub fn first_onset(&self, trace: &Trace) -> Option<DateTime<Utc>> {
        let df   = trace.sampling_rate;
        let nsta = (self.sta_seconds * df) as usize;
        let nlta = (self.lta_seconds * df) as usize;
        if df <= 0.0 || nsta == 0 || trace.len() <= nlta {
            return None;
        }
        let cft = recursive_sta_lta(&trace.samples, nsta, nlta);
        let (on, _) = *trigger_onset(&cft, self.thr_on, self.thr_off).first()?;
        Some(trace.start + Duration::seconds((on as f64 / df) as i64))
    }
}
