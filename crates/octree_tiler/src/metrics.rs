//! Job timing and progress collection for a conversion run.
//!
//! # Usage
//!
//! ```ignore
//! let mut timings = JobTimings::default();
//! timings.process_us.push(elapsed_us);
//! let summary = timings.summary();
//! ```

use std::collections::VecDeque;

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create a new rolling window with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push a new value, evicting the oldest if at capacity.
    pub fn push(&mut self, value: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Iterate over values (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// Get the most recent value.
    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl<T: Copy + Default + std::ops::Add<Output = T>> RollingWindow<T> {
    /// Compute the sum of all values.
    pub fn sum(&self) -> T {
        self.buffer.iter().copied().fold(T::default(), |acc, x| acc + x)
    }
}

impl RollingWindow<u64> {
    /// Compute the average of all values.
    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum() as f64 / self.buffer.len() as f64
        }
    }

    /// Get min and max values.
    pub fn min_max(&self) -> Option<(u64, u64)> {
        let min = *self.buffer.iter().min()?;
        let max = *self.buffer.iter().max()?;
        Some((min, max))
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Aggregate view of one timing window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSummary {
    pub samples: usize,
    pub average_us: f64,
    pub min_us: u64,
    pub max_us: u64,
}

impl From<&RollingWindow<u64>> for TimingSummary {
    fn from(window: &RollingWindow<u64>) -> Self {
        let (min_us, max_us) = window.min_max().unwrap_or((0, 0));
        Self {
            samples: window.len(),
            average_us: window.average(),
            min_us,
            max_us,
        }
    }
}

/// Recent job durations, per job kind, in microseconds.
#[derive(Debug, Clone, Default)]
pub struct JobTimings {
    pub read_us: RollingWindow<u64>,
    pub process_us: RollingWindow<u64>,
    pub write_us: RollingWindow<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobTimingSummary {
    pub read: TimingSummary,
    pub process: TimingSummary,
    pub write: TimingSummary,
}

impl JobTimings {
    pub fn summary(&self) -> JobTimingSummary {
        JobTimingSummary {
            read: (&self.read_us).into(),
            process: (&self.process_us).into(),
            write: (&self.write_us).into(),
        }
    }
}

/// (elapsed seconds, percent written) samples of a run.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    samples: Vec<(f64, f64)>,
}

impl ProgressLog {
    /// Record a sample if the percentage moved since the last one.
    pub fn record(&mut self, elapsed_s: f64, percent: f64) {
        if self.samples.last().map_or(true, |&(_, last)| last != percent) {
            self.samples.push((elapsed_s, percent));
        }
    }

    pub fn samples(&self) -> &[(f64, f64)] {
        &self.samples
    }

    /// CSV with a header line.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("elapsed_s,percent\n");
        for (elapsed, percent) in &self.samples {
            out.push_str(&format!("{elapsed:.3},{percent:.2}\n"));
        }
        out
    }
}
