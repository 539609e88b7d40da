//! Run orchestration
//!
//! Pure fan-out/fan-in: allocate every data file up front, spawn one thread
//! per worker, join them all, then report. No worker pool and no queue;
//! workers share only the stop flag, the read-only random map and the
//! mutex-guarded result sets.
//!
//! A failed worker logs its error and publishes nothing; the run finishes
//! with a degraded result count rather than crashing, and the shortfall is
//! reported at the end.

use crate::access::{AccessPattern, RandomMap};
use crate::alloc::SpaceAllocator;
use crate::config::Config;
use crate::output::{self, RunSummary};
use crate::stats::diskstats::{dev_from_path, StatsCollection};
use crate::stats::ResultSet;
use crate::worker::{Direction, Worker, WorkerConfig};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Raised by the SIGUSR1 handler; the progress monitor drains it and prints
/// each worker's cumulative bytes without stopping the run.
pub static DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Special paths that bypass allocation and cleanup entirely.
fn is_special_path(path: &Path) -> bool {
    path == Path::new("/dev/null") || path == Path::new("/dev/zero")
}

struct ProgressEntry {
    label: String,
    bytes: Arc<AtomicU64>,
}

struct LaunchPlan {
    config: WorkerConfig,
    /// Deleted after the run unless keep is set; `None` for special paths.
    cleanup: Option<PathBuf>,
}

/// Execute one full run: allocate, fan out, fan in, report.
///
/// `stop` is the cooperative cancellation flag, typically wired to SIGINT by
/// the caller. The returned summary has already been printed and written to
/// the configured outputs.
pub fn run(config: &Config, stop: Arc<AtomicBool>) -> Result<RunSummary> {
    let workload = &config.workload;
    let runtime = config.runtime;

    let random_map = match workload.pattern {
        AccessPattern::Random => Some(Arc::new(RandomMap::new(
            workload.file_size,
            workload.block_size,
        ))),
        _ => None,
    };

    // Allocate every data file before any worker starts. A path that cannot
    // be allocated launches no workers.
    let allocator = SpaceAllocator::new();
    if runtime.debug {
        eprintln!("space allocation primitive: {}", allocator.primitive_name());
    }

    let mut plans: Vec<LaunchPlan> = Vec::new();
    let mut writer_id = 0usize;
    let mut reader_id = 0usize;

    for path in &config.paths {
        let special = is_special_path(path);

        if special && workload.readers > 0 {
            eprintln!(
                "warning: skipping {} reader(s) on {}; reads from special devices are not meaningful",
                workload.readers,
                path.display()
            );
        }

        let mut path_plans: Vec<LaunchPlan> = Vec::new();
        let mut allocation_failed = false;

        for slot in 0..workload.workers_per_path() {
            let direction = if slot < workload.writers {
                Direction::Write
            } else {
                Direction::Read
            };
            if special && direction == Direction::Read {
                continue;
            }

            let (file, cleanup) = if special {
                (path.clone(), None)
            } else {
                let file = path.join(format!("scriba.{}.data", slot));
                match allocator.allocate(&file, workload.file_size, workload.keep) {
                    Ok(outcome) => {
                        if runtime.debug {
                            eprintln!("allocated {} ({:?})", file.display(), outcome);
                        }
                    }
                    Err(e) => {
                        eprintln!("error: unable to allocate {}: {:#}", file.display(), e);
                        allocation_failed = true;
                        break;
                    }
                }
                let cleanup = (!workload.keep).then(|| file.clone());
                (file, cleanup)
            };

            let id = match direction {
                Direction::Write => {
                    writer_id += 1;
                    writer_id - 1
                }
                Direction::Read => {
                    reader_id += 1;
                    reader_id - 1
                }
            };

            path_plans.push(LaunchPlan {
                config: WorkerConfig {
                    id,
                    file,
                    report_path: path.clone(),
                    direction,
                    pattern: workload.pattern,
                    fill: workload.fill,
                    block_size: workload.block_size,
                    file_size: workload.file_size,
                    start_offset: workload.start_offset,
                    byte_limit: match direction {
                        Direction::Write => workload.write_limit,
                        Direction::Read => workload.read_limit,
                    },
                    time_limit: workload.time_limit(),
                    batch_size: match direction {
                        Direction::Write => workload.batch_size,
                        Direction::Read => 0,
                    },
                    direct: workload.direct,
                    random_map: random_map.clone(),
                },
                cleanup,
            });
        }

        if allocation_failed {
            eprintln!(
                "error: skipping path {}; allocation failed before launch",
                path.display()
            );
            continue;
        }
        plans.extend(path_plans);
    }

    if plans.is_empty() {
        anyhow::bail!("no workers could be launched");
    }

    // Device statistics poller, one thread for the run's duration.
    let poller_handle = if config.output.stats_dir.is_some() {
        let mut collection = StatsCollection::new(runtime.debug);
        for path in &config.paths {
            if is_special_path(path) {
                continue;
            }
            if let Some(device) = dev_from_path(path, runtime.debug) {
                collection.add(&device);
            }
        }
        let poller_stop = Arc::new(AtomicBool::new(false));
        let stop_handle = poller_stop.clone();
        let handle = thread::spawn(move || {
            collection.collect(&stop_handle);
            collection
        });
        Some((handle, poller_stop))
    } else {
        None
    };

    // Progress monitor for SIGUSR1 dumps.
    let mut progress_entries: Vec<ProgressEntry> = Vec::new();

    let writer_results = Arc::new(ResultSet::new());
    let reader_results = Arc::new(ResultSet::new());

    let mut handles = Vec::with_capacity(plans.len());
    let launched = plans.len();

    for plan in plans {
        let direction = plan.config.direction;
        let label = format!(
            "[{} {}] {}",
            direction.label(),
            plan.config.id,
            plan.config.report_path.display()
        );
        let progress = Arc::new(AtomicU64::new(0));
        progress_entries.push(ProgressEntry {
            label: label.clone(),
            bytes: progress.clone(),
        });

        let results = match direction {
            Direction::Write => writer_results.clone(),
            Direction::Read => reader_results.clone(),
        };
        let worker = Worker::new(plan.config, runtime, results, stop.clone(), progress);
        let cleanup = plan.cleanup;

        handles.push((
            label,
            cleanup,
            thread::spawn(move || worker.run()),
        ));
    }

    let monitor_done = Arc::new(AtomicBool::new(false));
    let monitor_handle = {
        let done = monitor_done.clone();
        let entries = progress_entries;
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                if DUMP_REQUESTED.swap(false, Ordering::Relaxed) {
                    for entry in &entries {
                        eprintln!("{}: {} bytes moved", entry.label, entry.bytes.load(Ordering::Relaxed));
                    }
                }
                thread::sleep(Duration::from_millis(100));
            }
        })
    };

    // Fan-in barrier.
    let mut cleanup_paths: Vec<PathBuf> = Vec::new();
    for (label, cleanup, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("{} failed: {:#}", label, e),
            Err(_) => eprintln!("{} panicked", label),
        }
        if let Some(path) = cleanup {
            cleanup_paths.push(path);
        }
    }

    monitor_done.store(true, Ordering::Relaxed);
    let _ = monitor_handle.join();

    let received = writer_results.record_count() + reader_results.record_count();
    if received < launched {
        eprintln!(
            "warning: launched {} workers but received {} results; some workers failed",
            launched, received
        );
    }

    // Stop the poller and write its CSVs before the summary.
    if let Some((handle, poller_stop)) = poller_handle {
        poller_stop.store(true, Ordering::Relaxed);
        if let Ok(collection) = handle.join() {
            if let Some(dir) = &config.output.stats_dir {
                if let Err(e) = std::fs::create_dir_all(dir)
                    .map_err(anyhow::Error::from)
                    .and_then(|_| collection.write_csv(dir))
                {
                    eprintln!("error writing device statistics: {:#}", e);
                }
            }
        }
    }

    let mut writers = writer_results.take_all();
    let mut readers = reader_results.take_all();

    if let Some(base) = &config.output.latency_csv {
        if !writers.is_empty() {
            let path = output::latency_csv_variant(base, "write");
            if let Err(e) = output::write_latency_csv(&path, &writers) {
                eprintln!("error writing latency CSV: {:#}", e);
            }
        }
        if !readers.is_empty() {
            let path = output::latency_csv_variant(base, "read");
            if let Err(e) = output::write_latency_csv(&path, &readers) {
                eprintln!("error writing latency CSV: {:#}", e);
            }
        }
    }

    let summary = RunSummary::new(&mut writers, &mut readers);
    output::print_report("Writers", &summary.writers);
    output::print_report("Readers", &summary.readers);

    if let Some(path) = &config.output.json_summary {
        if let Err(e) = output::write_json_summary(path, &summary) {
            eprintln!("error writing JSON summary: {:#}", e);
        }
    }

    for path in cleanup_paths {
        if let Err(e) = std::fs::remove_file(&path) {
            eprintln!("warning: unable to remove {}: {}", path.display(), e);
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputConfig, RuntimeConfig, WorkloadConfig};
    use crate::pattern::FillPattern;

    fn tiny_config(dir: &Path) -> Config {
        Config {
            paths: vec![dir.to_path_buf()],
            workload: WorkloadConfig {
                writers: 2,
                readers: 1,
                block_size: 4096,
                file_size: 64 << 10,
                start_offset: 0,
                pattern: AccessPattern::Sequential,
                fill: FillPattern::Random,
                write_limit: 64 << 10,
                read_limit: 64 << 10,
                time_limit_secs: 0,
                batch_size: 0,
                direct: false,
                keep: false,
            },
            output: OutputConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }

    #[test]
    fn full_run_publishes_all_workers_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());

        let summary = run(&config, Arc::new(AtomicBool::new(false))).unwrap();

        assert_eq!(summary.writers.len(), 1);
        assert_eq!(summary.writers[0].workers, 2);
        assert_eq!(summary.writers[0].total_bytes, 2 * (64 << 10));
        assert_eq!(summary.readers[0].workers, 1);
        assert_eq!(summary.readers[0].total_bytes, 64 << 10);

        // Data files deleted without --keep.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn keep_leaves_data_files_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = tiny_config(dir.path());
        config.workload.keep = true;
        config.workload.readers = 0;
        config.workload.writers = 1;

        run(&config, Arc::new(AtomicBool::new(false))).unwrap();

        let file = dir.path().join("scriba.0.data");
        assert_eq!(std::fs::metadata(&file).unwrap().len(), 64 << 10);
    }

    #[test]
    fn random_pattern_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = tiny_config(dir.path());
        config.workload.pattern = AccessPattern::Random;
        config.workload.readers = 0;

        let summary = run(&config, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(summary.writers[0].total_bytes, 2 * (64 << 10));
    }

    #[test]
    fn latency_csvs_are_written_per_direction() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut config = tiny_config(dir.path());
        config.output.latency_csv = Some(out.path().join("latency.csv"));

        run(&config, Arc::new(AtomicBool::new(false))).unwrap();

        let write_csv = std::fs::read_to_string(out.path().join("latency.write.csv")).unwrap();
        let read_csv = std::fs::read_to_string(out.path().join("latency.read.csv")).unwrap();
        // Header plus 16 ops per writer worker / per reader worker.
        assert_eq!(write_csv.lines().count(), 1 + 2 * 16);
        assert_eq!(read_csv.lines().count(), 1 + 16);
    }

    #[test]
    fn preraised_stop_flag_short_circuits_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());

        let summary = run(&config, Arc::new(AtomicBool::new(true))).unwrap();
        // Workers still publish; they just move nothing.
        assert_eq!(summary.writers[0].total_bytes, 0);
    }

    #[test]
    fn dev_null_writers_bypass_allocation_and_cleanup() {
        let mut config = tiny_config(Path::new("/dev/null"));
        config.workload.writers = 1;
        config.workload.readers = 1; // skipped with a warning

        let summary = run(&config, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(summary.writers[0].total_bytes, 64 << 10);
        assert!(summary.readers.is_empty());
    }
}
