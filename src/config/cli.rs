//! Command-line surface
//!
//! Flags are parsed here and converted into [`Config`] before anything else
//! runs; the engine itself never sees a string. Sizes accept binary suffixes
//! ("4k", "16m", "1g").

use super::{Config, OutputConfig, RuntimeConfig, WorkloadConfig};
use crate::access::AccessPattern;
use crate::pattern::FillPattern;
use crate::util::parse_size;
use crate::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "scriba",
    version,
    about = "Concurrent disk and filesystem performance exerciser",
    long_about = "Drives configurable concurrent read and write workloads against one or \
                  more paths, measuring throughput and per-operation latency, optionally \
                  sampling block-device statistics from the host."
)]
pub struct Cli {
    /// Target directories, or /dev/null (writers) / /dev/zero (readers)
    #[arg(required_unless_present = "profile")]
    pub paths: Vec<PathBuf>,

    /// Number of concurrent writers per path
    #[arg(long, default_value_t = 1)]
    pub writers: usize,

    /// Number of concurrent readers per path
    #[arg(long, default_value_t = 0)]
    pub readers: usize,

    /// Bytes per operation ("4k", "1m", ...)
    #[arg(long, default_value = "1m", value_parser = parse_size)]
    pub block_size: u64,

    /// Data file size per worker
    #[arg(long, default_value = "32m", value_parser = parse_size)]
    pub file_size: u64,

    /// First offset for sequential/repeat patterns
    #[arg(long, default_value = "0", value_parser = parse_size)]
    pub start_offset: u64,

    /// Access pattern
    #[arg(long, value_enum, default_value_t = AccessPattern::Sequential)]
    pub pattern: AccessPattern,

    /// Data pattern written by writers
    #[arg(long, value_enum, default_value_t = FillPattern::Random)]
    pub fill: FillPattern,

    /// Byte budget per writer (defaults to the file size when no time limit
    /// is given)
    #[arg(long, value_parser = parse_size)]
    pub write_limit: Option<u64>,

    /// Byte budget per reader (defaults to the file size when no time limit
    /// is given)
    #[arg(long, value_parser = parse_size)]
    pub read_limit: Option<u64>,

    /// Wall-clock budget per worker, in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    pub time_limit: u64,

    /// Call fsync each time a writer has moved this many bytes
    #[arg(long, value_parser = parse_size)]
    pub batch_size: Option<u64>,

    /// Open data files with O_DIRECT (Linux only)
    #[arg(long)]
    pub direct: bool,

    /// Keep data files after the run instead of deleting them
    #[arg(long)]
    pub keep: bool,

    /// Write one latency sample per row to this CSV file
    #[arg(long)]
    pub latency_csv: Option<PathBuf>,

    /// Write per-device kernel I/O statistics CSVs into this directory
    #[arg(long)]
    pub stats_dir: Option<PathBuf>,

    /// Write a machine-readable run summary to this JSON file
    #[arg(long)]
    pub json_summary: Option<PathBuf>,

    /// Load run options from a TOML profile instead of flags
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Print debugging messages
    #[arg(long, env = "SCRIBA_DEBUG")]
    pub debug: bool,

    /// Print per-worker progress summaries
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolve flags (or a profile) into a validated-shape [`Config`].
    ///
    /// Workers need some bound to terminate: when neither a byte nor a time
    /// budget is given, the byte budget defaults to one pass over the file.
    pub fn into_config(self) -> Result<Config> {
        if let Some(profile_path) = &self.profile {
            let profile = super::profile::load(profile_path)?;
            return profile.into_config(RuntimeConfig {
                debug: self.debug,
                verbose: self.verbose,
            });
        }

        let default_limit = |explicit: Option<u64>, active: bool| -> u64 {
            match explicit {
                Some(limit) => limit,
                None if active && self.time_limit == 0 => self.file_size,
                None => 0,
            }
        };

        Ok(Config {
            paths: self.paths,
            workload: WorkloadConfig {
                writers: self.writers,
                readers: self.readers,
                block_size: self.block_size,
                file_size: self.file_size,
                start_offset: self.start_offset,
                pattern: self.pattern,
                fill: self.fill,
                write_limit: default_limit(self.write_limit, self.writers > 0),
                read_limit: default_limit(self.read_limit, self.readers > 0),
                time_limit_secs: self.time_limit,
                batch_size: self.batch_size.unwrap_or(0),
                direct: self.direct,
                keep: self.keep,
            },
            output: OutputConfig {
                latency_csv: self.latency_csv,
                stats_dir: self.stats_dir,
                json_summary: self.json_summary,
            },
            runtime: RuntimeConfig {
                debug: self.debug,
                verbose: self.verbose,
            },
        })
    }
}
