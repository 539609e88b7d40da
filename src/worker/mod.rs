//! Worker engine
//!
//! One worker is one concurrent unit of load: it opens its data file,
//! repeatedly asks the [`AccessPlanner`](crate::access::AccessPlanner) for an
//! offset, performs one positioned read or write of a block, and records the
//! syscall's wall-clock latency. Readers and writers share the same control
//! loop, parameterized by [`Direction`].
//!
//! Stop conditions are checked between operations, in order: the cooperative
//! stop flag, the byte budget, the time budget. An in-flight syscall is
//! always allowed to complete, so budgets are soft by up to one block (or one
//! flush).
//!
//! Only the syscall is timed. Offset computation, buffer refill and periodic
//! flushes happen outside the measured interval; flush durations are
//! recorded as their own sample sequence.

use crate::access::{AccessPattern, AccessPlanner, RandomMap};
use crate::config::RuntimeConfig;
use crate::pattern::{FillPattern, PatternBuffer};
use crate::stats::{LatencyRecorder, ResultSet, Throughput};
use crate::util::aligned::AlignedBuffer;
use crate::util::{humanize_size, MIB};
use crate::Result;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Whether this worker reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Read => "reader",
            Direction::Write => "writer",
        }
    }
}

/// Immutable per-worker snapshot, assembled by the orchestrator before the
/// worker starts. The running counters (bytes moved, samples) live inside
/// the worker and belong exclusively to it until publish time.
pub struct WorkerConfig {
    pub id: usize,
    /// The data file this worker opens.
    pub file: PathBuf,
    /// The path key the result is published under (the target directory).
    pub report_path: PathBuf,
    pub direction: Direction,
    pub pattern: AccessPattern,
    pub fill: FillPattern,
    pub block_size: u64,
    pub file_size: u64,
    pub start_offset: u64,
    /// Byte budget; 0 means no byte bound.
    pub byte_limit: u64,
    /// Wall-clock budget; zero means no time bound.
    pub time_limit: Duration,
    /// Writer flush interval in bytes; 0 disables periodic sync.
    pub batch_size: u64,
    pub direct: bool,
    /// Shared offset permutation, required for the random pattern.
    pub random_map: Option<Arc<RandomMap>>,
}

/// The per-worker control loop.
pub struct Worker {
    config: WorkerConfig,
    runtime: RuntimeConfig,
    results: Arc<ResultSet>,
    stop: Arc<AtomicBool>,
    /// Cumulative bytes moved, readable by the progress monitor.
    progress: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        runtime: RuntimeConfig,
        results: Arc<ResultSet>,
        stop: Arc<AtomicBool>,
        progress: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config,
            runtime,
            results,
            stop,
            progress,
        }
    }

    /// Run to completion and publish one [`Throughput`] record.
    ///
    /// Setup failures and mid-loop I/O errors other than reader end-of-file
    /// return early without publishing; the orchestrator detects the missing
    /// record by comparing workers launched against results received.
    pub fn run(self) -> Result<()> {
        let cfg = &self.config;
        let label = cfg.direction.label();

        if self.runtime.debug {
            eprintln!("[{} {}] starting against {}", label, cfg.id, cfg.file.display());
        }

        let file = self.open_file().with_context(|| {
            format!("[{} {}] unable to open {}", label, cfg.id, cfg.file.display())
        })?;

        let mut planner = AccessPlanner::new(
            cfg.pattern,
            cfg.block_size,
            cfg.file_size,
            cfg.start_offset,
            cfg.random_map.clone(),
        )
        .with_context(|| format!("[{} {}] unable to build access plan", label, cfg.id))?;

        // Writers serve blocks out of a private pattern buffer; regenerating
        // it per worker keeps the fill step contention-free.
        let mut source = match cfg.direction {
            Direction::Write => {
                if self.runtime.debug {
                    eprintln!("[{} {}] generating data buffer", label, cfg.id);
                }
                Some(PatternBuffer::new(cfg.block_size as usize, cfg.fill))
            }
            Direction::Read => None,
        };

        let alignment = if cfg.direct { 4096 } else { 512 };
        let mut block = AlignedBuffer::new(cfg.block_size as usize, alignment);

        let mut latencies = LatencyRecorder::new();
        let mut flushes = LatencyRecorder::new();
        let mut bytes_moved: u64 = 0;
        let mut flushed_intervals: u64 = 0;
        let start = Instant::now();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if cfg.byte_limit > 0 && bytes_moved >= cfg.byte_limit {
                if self.runtime.debug {
                    eprintln!("[{} {}] byte budget reached", label, cfg.id);
                }
                break;
            }
            if !cfg.time_limit.is_zero() && start.elapsed() >= cfg.time_limit {
                if self.runtime.debug {
                    eprintln!("[{} {}] time budget reached", label, cfg.id);
                }
                break;
            }

            let offset = planner.next_offset();

            // Clamp the final operation to the remaining budget. Under
            // O_DIRECT alignment wins and the worker overshoots by at most
            // one block.
            let mut len = cfg.block_size as usize;
            if cfg.byte_limit > 0 && !cfg.direct {
                len = len.min((cfg.byte_limit - bytes_moved) as usize);
            }

            match cfg.direction {
                Direction::Write => {
                    let data = &mut block.as_mut_slice()[..len];
                    if let Some(src) = source.as_mut() {
                        src.fill(data);
                    }

                    let timer = Instant::now();
                    let written = file.write_at(data, offset).with_context(|| {
                        format!("[{} {}] write failed at offset {}", label, cfg.id, offset)
                    })?;
                    let latency = timer.elapsed();

                    bytes_moved += written as u64;
                    self.progress.store(bytes_moved, Ordering::Relaxed);

                    // Only full transfers contribute samples, so a short
                    // write does not skew the distribution.
                    if written == len {
                        latencies.record(latency);
                    }

                    if cfg.batch_size > 0 && bytes_moved / cfg.batch_size > flushed_intervals {
                        let timer = Instant::now();
                        // Character devices reject fsync; the data was still
                        // accepted, so a failed sync is not fatal.
                        if let Err(e) = file.sync_all() {
                            if self.runtime.debug {
                                eprintln!("[{} {}] fsync failed: {}", label, cfg.id, e);
                            }
                        }
                        flushes.record(timer.elapsed());
                        flushed_intervals = bytes_moved / cfg.batch_size;
                    }
                }
                Direction::Read => {
                    let data = &mut block.as_mut_slice()[..len];

                    let timer = Instant::now();
                    let read = file.read_at(data, offset).with_context(|| {
                        format!("[{} {}] read failed at offset {}", label, cfg.id, offset)
                    })?;
                    let latency = timer.elapsed();

                    bytes_moved += read as u64;
                    self.progress.store(bytes_moved, Ordering::Relaxed);

                    if read < len {
                        if read == 0 && offset == 0 {
                            anyhow::bail!(
                                "[{} {}] read no data at offset 0; file is empty",
                                label,
                                cfg.id
                            );
                        }
                        // End-of-file: wrap to the start and keep going. The
                        // partial transfer is excluded from the samples.
                        planner.rewind();
                        continue;
                    }
                    latencies.record(latency);
                }
            }
        }

        if cfg.direction == Direction::Write {
            if let Err(e) = file.sync_all() {
                if self.runtime.debug {
                    eprintln!("[{} {}] final fsync failed: {}", label, cfg.id, e);
                }
            }
        }
        drop(file);

        let elapsed = start.elapsed();
        if self.runtime.verbose {
            let secs = elapsed.as_secs_f64();
            eprintln!(
                "[{} {}] moved {} on {} ({:.2} MiB/s, {:.2} sec)",
                label,
                cfg.id,
                humanize_size(bytes_moved as f64, true),
                cfg.report_path.display(),
                bytes_moved as f64 / MIB as f64 / secs.max(f64::EPSILON),
                secs,
            );
        }

        self.results.publish(
            &cfg.report_path,
            Throughput {
                worker_id: cfg.id,
                bytes: bytes_moved,
                elapsed,
                latencies,
                flushes,
            },
        );

        Ok(())
    }

    fn open_file(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        match self.config.direction {
            Direction::Read => options.read(true),
            Direction::Write => options.write(true),
        };

        #[cfg(target_os = "linux")]
        if self.config.direct {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_DIRECT);
        }

        Ok(options.open(&self.config.file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SpaceAllocator;
    use std::path::Path;

    fn prepared_file(dir: &Path, size: u64) -> PathBuf {
        let path = dir.join("scriba.0.data");
        SpaceAllocator::new().allocate(&path, size, false).unwrap();
        path
    }

    fn worker_config(file: PathBuf, direction: Direction) -> WorkerConfig {
        let report_path = file.parent().unwrap().to_path_buf();
        WorkerConfig {
            id: 0,
            file,
            report_path,
            direction,
            pattern: AccessPattern::Sequential,
            fill: FillPattern::Random,
            block_size: 4096,
            file_size: 1 << 20,
            start_offset: 0,
            byte_limit: 1 << 20,
            time_limit: Duration::ZERO,
            batch_size: 0,
            direct: false,
            random_map: None,
        }
    }

    fn run_worker(config: WorkerConfig) -> (Arc<ResultSet>, Arc<AtomicU64>) {
        let results = Arc::new(ResultSet::new());
        let stop = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(AtomicU64::new(0));
        Worker::new(
            config,
            RuntimeConfig::default(),
            results.clone(),
            stop,
            progress.clone(),
        )
        .run()
        .unwrap();
        (results, progress)
    }

    #[test]
    fn writer_hits_byte_budget_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 1 << 20);
        let (results, progress) = run_worker(worker_config(file, Direction::Write));

        let mut map = results.take_all();
        let records = map.get_mut(dir.path()).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        // 1 MiB budget at 4 KiB blocks: 256 full operations, no wraparound.
        assert_eq!(record.bytes, 1 << 20);
        assert_eq!(record.latencies.len(), 256);
        assert!(record.flushes.is_empty());
        assert_eq!(progress.load(Ordering::Relaxed), 1 << 20);
    }

    #[test]
    fn writer_wraps_past_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 1 << 20);
        let mut config = worker_config(file, Direction::Write);
        config.byte_limit = 2 << 20;

        let (results, _) = run_worker(config);
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];

        // Twice the file size: one wrap back to offset 0, 512 operations.
        assert_eq!(record.bytes, 2 << 20);
        assert_eq!(record.latencies.len(), 512);
    }

    #[test]
    fn writer_flushes_on_batch_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 1 << 20);
        let mut config = worker_config(file, Direction::Write);
        config.batch_size = 256 << 10;

        let (results, _) = run_worker(config);
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];

        // Crossings at 256K, 512K, 768K and 1M; the final fsync is part of
        // shutdown and not sampled.
        assert_eq!(record.flushes.len(), 4);
        assert_eq!(record.latencies.len(), 256);
    }

    #[test]
    fn reader_covers_file_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 64 << 10);
        let mut config = worker_config(file, Direction::Read);
        config.file_size = 64 << 10;
        config.byte_limit = 128 << 10;

        let (results, _) = run_worker(config);
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];

        assert_eq!(record.bytes, 128 << 10);
        assert_eq!(record.latencies.len(), 32);
    }

    #[test]
    fn random_pattern_moves_full_budget() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 1 << 20);
        let mut config = worker_config(file, Direction::Write);
        config.pattern = AccessPattern::Random;
        config.random_map = Some(Arc::new(RandomMap::new(1 << 20, 4096)));

        let (results, _) = run_worker(config);
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];
        assert_eq!(record.bytes, 1 << 20);
        assert_eq!(record.latencies.len(), 256);
    }

    #[test]
    fn raised_stop_flag_halts_before_first_operation() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 64 << 10);
        let mut config = worker_config(file, Direction::Write);
        config.file_size = 64 << 10;
        config.byte_limit = 64 << 10;

        let results = Arc::new(ResultSet::new());
        let stop = Arc::new(AtomicBool::new(true));
        Worker::new(
            config,
            RuntimeConfig::default(),
            results.clone(),
            stop,
            Arc::new(AtomicU64::new(0)),
        )
        .run()
        .unwrap();

        // A stopped worker still publishes what it has: nothing moved.
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];
        assert_eq!(record.bytes, 0);
        assert!(record.latencies.is_empty());
    }

    #[test]
    fn time_budget_terminates_unbounded_worker() {
        let dir = tempfile::tempdir().unwrap();
        let file = prepared_file(dir.path(), 64 << 10);
        let mut config = worker_config(file, Direction::Write);
        config.file_size = 64 << 10;
        config.byte_limit = 0;
        config.time_limit = Duration::from_millis(50);

        let (results, _) = run_worker(config);
        let mut map = results.take_all();
        let record = &map.get_mut(dir.path()).unwrap()[0];
        assert!(record.bytes > 0);
        assert!(record.elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn missing_file_aborts_without_publishing() {
        let dir = tempfile::tempdir().unwrap();
        let config = worker_config(dir.path().join("absent.data"), Direction::Read);

        let results = Arc::new(ResultSet::new());
        let outcome = Worker::new(
            config,
            RuntimeConfig::default(),
            results.clone(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicU64::new(0)),
        )
        .run();

        assert!(outcome.is_err());
        assert_eq!(results.record_count(), 0);
    }
}
