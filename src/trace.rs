//! In-memory waveform trace.

use chrono::{DateTime, Duration, Utc};

/// Seconds (microsecond precision) as a chrono duration.
pub fn seconds(secs: f64) -> Duration {
    Duration::microseconds((secs * 1e6).round() as i64)
}

/// Signed span `b - a` in seconds.
pub fn span_secs(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let d = b - a;
    match d.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None     => d.num_milliseconds() as f64 / 1e3,
    }
}

/// One contiguous run of evenly spaced samples for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub network:       String,
    pub station:       String,
    pub location:      String,
    pub channel:       String,
    pub start:         DateTime<Utc>,
    pub sampling_rate: f64,
    pub samples:       Vec<f64>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn delta(&self) -> f64 {
        if self.sampling_rate > 0.0 { 1.0 / self.sampling_rate } else { 0.0 }
    }

    /// Time of the last sample.
    pub fn end(&self) -> DateTime<Utc> {
        let n = self.samples.len().saturating_sub(1);
        self.time_of(n)
    }

    pub fn time_of(&self, index: usize) -> DateTime<Utc> {
        self.start + seconds(index as f64 * self.delta())
    }

    /// Where the next sample would fall, for stitching records together.
    pub fn next_sample_time(&self) -> DateTime<Utc> {
        self.time_of(self.samples.len())
    }

    /// True when `[start, end]` lies inside the trace, with `end` strictly
    /// before the last sample.
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        !self.is_empty() && self.start <= start && end < self.end()
    }

    /// Samples between `start` and `end` (inclusive, nearest sample at both
    /// ends). `None` when the window misses the trace entirely.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Trace> {
        if self.is_empty() || end < start || self.sampling_rate <= 0.0 {
            return None;
        }
        let last = self.samples.len() as i64 - 1;
        let i0 = (span_secs(self.start, start) * self.sampling_rate).round() as i64;
        let i1 = (span_secs(self.start, end) * self.sampling_rate).round() as i64;
        if i1 < 0 || i0 > last {
            return None;
        }
        let (i0, i1) = (i0.max(0) as usize, i1.min(last) as usize);

        Some(Trace {
            network:       self.network.clone(),
            station:       self.station.clone(),
            location:      self.location.clone(),
            channel:       self.channel.clone(),
            start:         self.time_of(i0),
            sampling_rate: self.sampling_rate,
            samples:       self.samples[i0..=i1].to_vec(),
        })
    }
}
