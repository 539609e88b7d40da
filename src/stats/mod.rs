//! Per-operation latency recording and run results
//!
//! Every worker owns a [`LatencyRecorder`] while it runs; ownership of the
//! sample sequence moves into the shared [`ResultSet`] exactly once, at
//! publish time. After that the records are immutable.
//!
//! Percentiles are exact: queries sort a cached copy of the raw samples and
//! linearly interpolate between the two nearest ranks. The cache is
//! invalidated whenever a new sample arrives.

pub mod diskstats;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Append-only latency sample sequence with cached-sort percentile queries.
#[derive(Debug, Default)]
pub struct LatencyRecorder {
    samples: Vec<Duration>,
    sorted: Option<Vec<Duration>>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample. Amortized O(1); invalidates the sorted cache.
    #[inline]
    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
        self.sorted = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in arrival order.
    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    /// Arithmetic mean. `None` for an empty recorder — workers that completed
    /// zero operations produce empty sample lists.
    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: u128 = self.samples.iter().map(|d| d.as_nanos()).sum();
        Some(Duration::from_nanos(
            (total / self.samples.len() as u128) as u64,
        ))
    }

    /// Interpolated percentile for `q` in `[0, 1]`.
    ///
    /// `q = 0` is the minimum, `q = 1` the maximum; in between the value is
    /// linearly interpolated between the two nearest ranks of the sorted
    /// sample set.
    pub fn percentile(&mut self, q: f64) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);

        let sorted = self.sorted.get_or_insert_with(|| {
            let mut copy = self.samples.clone();
            copy.sort_unstable();
            copy
        });

        let rank = q * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Some(sorted[lo]);
        }

        let frac = rank - lo as f64;
        let lo_ns = sorted[lo].as_nanos() as f64;
        let hi_ns = sorted[hi].as_nanos() as f64;
        Some(Duration::from_nanos((lo_ns + (hi_ns - lo_ns) * frac) as u64))
    }
}

/// One worker's published result: totals plus the owned sample sequences.
///
/// Flush samples are kept separate from per-operation latency so that p99
/// write figures stay comparable across flush-interval configurations.
#[derive(Debug)]
pub struct Throughput {
    pub worker_id: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub latencies: LatencyRecorder,
    pub flushes: LatencyRecorder,
}

impl Throughput {
    /// Mean data rate over the worker's own wall time, in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Mutex-guarded accumulator mapping each path to the records of the workers
/// that touched it. The lock is held only for the append, never across I/O.
#[derive(Debug, Default)]
pub struct ResultSet {
    inner: Mutex<BTreeMap<PathBuf, Vec<Throughput>>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one worker's record. Called exactly once per successful
    /// worker; workers that fail never reach this point.
    pub fn publish(&self, path: &Path, record: Throughput) {
        let mut map = self.inner.lock().unwrap();
        map.entry(path.to_path_buf()).or_default().push(record);
    }

    /// Total records published so far, across all paths.
    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Drain all published records, leaving the set empty. Called once after
    /// the fan-in barrier, when no worker can still hold a reference.
    pub fn take_all(&self) -> BTreeMap<PathBuf, Vec<Throughput>> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }
}
