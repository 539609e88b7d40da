//! Scriba - concurrent disk and filesystem performance exerciser
//!
//! Scriba drives configurable concurrent read and write workloads against
//! one or more paths, measuring throughput and per-operation latency, and
//! optionally sampling the kernel's block-device statistics for the run's
//! duration.
//!
//! # Architecture
//!
//! - **Worker engine**: one thread per reader/writer, a shared control loop
//!   with cooperative cancellation and byte/time budgets
//! - **Access patterns**: sequential, shuffled-permutation random, repeated
//!   offset, Zipf-skewed hot spots
//! - **Exact latency**: raw per-operation samples with interpolated
//!   percentiles, exported row-per-sample to CSV
//! - **Preallocation**: zero-fill allocate on Linux, truncate elsewhere
//! - **Device stats**: per-second `/sys/block` counter snapshots

pub mod access;
pub mod alloc;
pub mod config;
pub mod coordinator;
pub mod output;
pub mod pattern;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use stats::{LatencyRecorder, ResultSet, Throughput};

/// Result type used throughout Scriba
pub type Result<T> = anyhow::Result<T>;
