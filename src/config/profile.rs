//! TOML run profiles
//!
//! A profile file captures the same options as the command line so a
//! recurring benchmark can be described once and replayed with
//! `scriba --profile run.toml`. Sizes are strings with the usual binary
//! suffixes. Debug/verbose stay on the command line.
//!
//! ```toml
//! paths = ["/mnt/bench"]
//! writers = 4
//! readers = 2
//! block_size = "4k"
//! file_size = "1g"
//! pattern = "random"
//! time_limit = 60
//! latency_csv = "latency.csv"
//! ```

use super::{Config, OutputConfig, RuntimeConfig, WorkloadConfig};
use crate::access::AccessPattern;
use crate::pattern::FillPattern;
use crate::util::parse_size;
use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_writers")]
    pub writers: usize,
    #[serde(default)]
    pub readers: usize,
    #[serde(default = "default_block_size")]
    pub block_size: String,
    #[serde(default = "default_file_size")]
    pub file_size: String,
    #[serde(default)]
    pub start_offset: Option<String>,
    #[serde(default)]
    pub pattern: Option<AccessPattern>,
    #[serde(default)]
    pub fill: Option<FillPattern>,
    #[serde(default)]
    pub write_limit: Option<String>,
    #[serde(default)]
    pub read_limit: Option<String>,
    /// Seconds; 0 means no time bound.
    #[serde(default)]
    pub time_limit: u64,
    #[serde(default)]
    pub batch_size: Option<String>,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub keep: bool,
    #[serde(default)]
    pub latency_csv: Option<PathBuf>,
    #[serde(default)]
    pub stats_dir: Option<PathBuf>,
    #[serde(default)]
    pub json_summary: Option<PathBuf>,
}

fn default_writers() -> usize {
    1
}

fn default_block_size() -> String {
    "1m".to_string()
}

fn default_file_size() -> String {
    "32m".to_string()
}

/// Read and parse a profile file.
pub fn load(path: &Path) -> Result<Profile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read profile {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("unable to parse profile {}", path.display()))
}

impl Profile {
    /// Resolve the profile into a [`Config`], applying the same defaulting
    /// rules as the command line.
    pub fn into_config(self, runtime: RuntimeConfig) -> Result<Config> {
        let file_size = parse_size(&self.file_size)?;
        let parse_opt = |value: &Option<String>| -> Result<u64> {
            value.as_deref().map(parse_size).transpose().map(|v| v.unwrap_or(0))
        };

        let mut write_limit = parse_opt(&self.write_limit)?;
        let mut read_limit = parse_opt(&self.read_limit)?;
        if self.time_limit == 0 {
            if self.write_limit.is_none() && self.writers > 0 {
                write_limit = file_size;
            }
            if self.read_limit.is_none() && self.readers > 0 {
                read_limit = file_size;
            }
        }

        Ok(Config {
            paths: self.paths,
            workload: WorkloadConfig {
                writers: self.writers,
                readers: self.readers,
                block_size: parse_size(&self.block_size)?,
                file_size,
                start_offset: parse_opt(&self.start_offset)?,
                pattern: self.pattern.unwrap_or(AccessPattern::Sequential),
                fill: self.fill.unwrap_or(FillPattern::Random),
                write_limit,
                read_limit,
                time_limit_secs: self.time_limit,
                batch_size: parse_opt(&self.batch_size)?,
                direct: self.direct,
                keep: self.keep,
            },
            output: OutputConfig {
                latency_csv: self.latency_csv,
                stats_dir: self.stats_dir,
                json_summary: self.json_summary,
            },
            runtime,
        })
    }
}
