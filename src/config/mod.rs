//! Run configuration
//!
//! The engine never parses strings: the CLI (or a TOML profile) is converted
//! into these structs up front, validated once, and then shared immutably
//! with every worker. The old notion of process-wide `Debug`/`Verbose`/`Stop`
//! globals is replaced by [`RuntimeConfig`] and an explicit stop flag handed
//! to each worker.

pub mod cli;
pub mod profile;

use crate::access::AccessPattern;
use crate::pattern::FillPattern;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything one run needs, assembled before any worker starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target directories (or `/dev/null` / `/dev/zero`).
    pub paths: Vec<PathBuf>,
    pub workload: WorkloadConfig,
    pub output: OutputConfig,
    pub runtime: RuntimeConfig,
}

/// The I/O workload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Concurrent writers per path.
    pub writers: usize,
    /// Concurrent readers per path.
    pub readers: usize,
    /// Bytes per operation.
    pub block_size: u64,
    /// Size each data file is allocated to before the run.
    pub file_size: u64,
    /// First offset targeted by sequential and repeat patterns.
    pub start_offset: u64,
    pub pattern: AccessPattern,
    pub fill: FillPattern,
    /// Byte budget per writer; 0 means bounded by the time limit only.
    pub write_limit: u64,
    /// Byte budget per reader; 0 means bounded by the time limit only.
    pub read_limit: u64,
    /// Wall-clock budget per worker; 0 means no time bound.
    pub time_limit_secs: u64,
    /// Writer flush interval in bytes; 0 disables periodic sync.
    pub batch_size: u64,
    /// Open data files with O_DIRECT (Linux only).
    pub direct: bool,
    /// Leave data files on disk after the run.
    pub keep: bool,
}

impl WorkloadConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    pub fn workers_per_path(&self) -> usize {
        self.writers + self.readers
    }
}

/// Where results end up beyond the console report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Per-sample latency CSV.
    pub latency_csv: Option<PathBuf>,
    /// Directory receiving one device-stats CSV per block device.
    pub stats_dir: Option<PathBuf>,
    /// Machine-readable run summary.
    pub json_summary: Option<PathBuf>,
}

/// Diagnostics verbosity, passed explicitly instead of living in globals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub debug: bool,
    pub verbose: bool,
}

/// Reject configurations the engine cannot run. Called once, before
/// allocation or worker launch.
pub fn validate(config: &Config) -> Result<()> {
    let w = &config.workload;

    if config.paths.is_empty() {
        anyhow::bail!("at least one target path is required");
    }
    if w.workers_per_path() == 0 {
        anyhow::bail!("at least one reader or writer is required");
    }
    if w.block_size == 0 {
        anyhow::bail!("block size must be nonzero");
    }
    if w.file_size < w.block_size {
        anyhow::bail!(
            "file size ({}) must be at least one block ({})",
            w.file_size,
            w.block_size
        );
    }
    if w.pattern == AccessPattern::Zipf && w.readers > 0 {
        anyhow::bail!("zipf is a write-side pattern; readers do not support it");
    }
    if w.start_offset % w.block_size != 0 {
        anyhow::bail!("start offset must be block-aligned");
    }
    if w.start_offset >= w.file_size {
        anyhow::bail!("start offset lies beyond the end of the file");
    }
    if w.direct {
        if !cfg!(target_os = "linux") {
            anyhow::bail!("direct I/O is only supported on Linux");
        }
        if w.block_size % 512 != 0 {
            anyhow::bail!("direct I/O requires a block size that is a multiple of 512");
        }
    }
    if w.time_limit_secs == 0 {
        if w.writers > 0 && w.write_limit == 0 {
            anyhow::bail!("writers have neither a byte nor a time budget; the run would never finish");
        }
        if w.readers > 0 && w.read_limit == 0 {
            anyhow::bail!("readers have neither a byte nor a time budget; the run would never finish");
        }
    }

    let total_workers = w.workers_per_path() * config.paths.len();
    if total_workers > num_cpus::get() * 4 {
        eprintln!(
            "warning: {} workers on {} CPUs; results may reflect scheduler contention",
            total_workers,
            num_cpus::get()
        );
    }

    Ok(())
}
