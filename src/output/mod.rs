//! Result reporting: console summary, latency CSV, JSON summary
//!
//! All of this runs after measurement is complete, so output failures are
//! logged by the caller rather than aborting the run.
//!
//! The latency CSV holds one row per recorded sample
//! (`path,worker_id,latency_microseconds`), written separately for the
//! reader and writer result sets. Flush samples are writer shutdown detail
//! and appear only in the summaries.

use crate::stats::Throughput;
use crate::util::{humanize_size, MIB};
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Latency figures in microseconds, queried from one worker's samples.
#[derive(Debug, Serialize)]
pub struct LatencySummary {
    pub min_us: f64,
    pub mean_us: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

impl LatencySummary {
    fn from_recorder(recorder: &mut crate::stats::LatencyRecorder) -> Option<Self> {
        if recorder.is_empty() {
            return None;
        }
        let us = |d: std::time::Duration| d.as_secs_f64() * 1e6;
        Some(Self {
            min_us: us(recorder.min()?),
            mean_us: us(recorder.mean()?),
            p50_us: us(recorder.percentile(0.5)?),
            p95_us: us(recorder.percentile(0.95)?),
            p99_us: us(recorder.percentile(0.99)?),
            max_us: us(recorder.max()?),
        })
    }
}

/// One worker's contribution to a path summary.
#[derive(Debug, Serialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub bytes: u64,
    pub seconds: f64,
    pub mib_per_sec: f64,
    pub operations: usize,
    pub latency: Option<LatencySummary>,
    pub flush_count: usize,
    pub flush_latency: Option<LatencySummary>,
}

/// Per-path aggregate: summed bytes over summed worker time. Percentiles are
/// never merged across workers; they stay per worker.
#[derive(Debug, Serialize)]
pub struct PathSummary {
    pub path: PathBuf,
    pub workers: usize,
    pub total_bytes: u64,
    pub total_seconds: f64,
    pub mib_per_sec: f64,
    pub per_worker: Vec<WorkerSummary>,
}

/// Machine-readable run summary for the whole process.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub version: &'static str,
    pub writers: Vec<PathSummary>,
    pub readers: Vec<PathSummary>,
}

impl RunSummary {
    pub fn new(
        writers: &mut BTreeMap<PathBuf, Vec<Throughput>>,
        readers: &mut BTreeMap<PathBuf, Vec<Throughput>>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            writers: summarize(writers),
            readers: summarize(readers),
        }
    }
}

/// Fold published records into per-path summaries.
pub fn summarize(results: &mut BTreeMap<PathBuf, Vec<Throughput>>) -> Vec<PathSummary> {
    results
        .iter_mut()
        .map(|(path, records)| {
            let total_bytes: u64 = records.iter().map(|r| r.bytes).sum();
            let total_seconds: f64 = records.iter().map(|r| r.elapsed.as_secs_f64()).sum();

            let per_worker = records
                .iter_mut()
                .map(|record| WorkerSummary {
                    worker_id: record.worker_id,
                    bytes: record.bytes,
                    seconds: record.elapsed.as_secs_f64(),
                    mib_per_sec: record.bytes_per_sec() / MIB as f64,
                    operations: record.latencies.len(),
                    latency: LatencySummary::from_recorder(&mut record.latencies),
                    flush_count: record.flushes.len(),
                    flush_latency: LatencySummary::from_recorder(&mut record.flushes),
                })
                .collect();

            PathSummary {
                path: path.clone(),
                workers: records.len(),
                total_bytes,
                total_seconds,
                mib_per_sec: if total_seconds > 0.0 {
                    total_bytes as f64 / MIB as f64 / total_seconds
                } else {
                    0.0
                },
                per_worker,
            }
        })
        .collect()
}

/// Write the per-sample latency CSV for one result set.
pub fn write_latency_csv(path: &Path, results: &BTreeMap<PathBuf, Vec<Throughput>>) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("unable to create latency CSV {}", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "path,worker_id,latency_microseconds")?;
    for (target, records) in results {
        for record in records {
            for sample in record.latencies.samples() {
                writeln!(
                    out,
                    "{},{},{}",
                    target.display(),
                    record.worker_id,
                    sample.as_micros()
                )?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Derive the reader/writer variant of a latency CSV path:
/// `latency.csv` -> `latency.write.csv` / `latency.read.csv`.
pub fn latency_csv_variant(base: &Path, suffix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "latency".to_string());
    let ext = base
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    base.with_file_name(format!("{}.{}.{}", stem, suffix, ext))
}

/// Serialize the run summary as pretty JSON.
pub fn write_json_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("unable to create JSON summary {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)
        .with_context(|| format!("unable to serialize JSON summary {}", path.display()))?;
    Ok(())
}

/// Print the console report for one result set.
pub fn print_report(title: &str, summaries: &[PathSummary]) {
    if summaries.is_empty() {
        return;
    }

    println!();
    println!("{}", title);
    for summary in summaries {
        println!(
            "  {}: {} across {} worker(s), {:.2} MiB/s",
            summary.path.display(),
            humanize_size(summary.total_bytes as f64, true),
            summary.workers,
            summary.mib_per_sec,
        );
        for worker in &summary.per_worker {
            let latency = match &worker.latency {
                Some(l) => format!(
                    "lat us min/mean/p50/p95/p99/max {:.0}/{:.0}/{:.0}/{:.0}/{:.0}/{:.0}",
                    l.min_us, l.mean_us, l.p50_us, l.p95_us, l.p99_us, l.max_us
                ),
                None => "no completed operations".to_string(),
            };
            let flushes = if worker.flush_count > 0 {
                format!(", {} flushes", worker.flush_count)
            } else {
                String::new()
            };
            println!(
                "    worker {:>3}: {} in {:.2}s ({:.2} MiB/s), {} ops, {}{}",
                worker.worker_id,
                humanize_size(worker.bytes as f64, true),
                worker.seconds,
                worker.mib_per_sec,
                worker.operations,
                latency,
                flushes,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LatencyRecorder;
    use std::time::Duration;

    fn sample_results() -> BTreeMap<PathBuf, Vec<Throughput>> {
        let mut latencies = LatencyRecorder::new();
        for ms in [1, 2, 3, 4, 5] {
            latencies.record(Duration::from_millis(ms));
        }

        let mut map = BTreeMap::new();
        map.insert(
            PathBuf::from("/mnt/bench"),
            vec![Throughput {
                worker_id: 3,
                bytes: 10 * 1048576,
                elapsed: Duration::from_secs(2),
                latencies,
                flushes: LatencyRecorder::new(),
            }],
        );
        map
    }

    #[test]
    fn summarize_sums_bytes_and_time() {
        let mut results = sample_results();
        let summaries = summarize(&mut results);

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.workers, 1);
        assert_eq!(summary.total_bytes, 10 * 1048576);
        assert!((summary.mib_per_sec - 5.0).abs() < 1e-9);

        let worker = &summary.per_worker[0];
        assert_eq!(worker.operations, 5);
        let latency = worker.latency.as_ref().unwrap();
        assert!((latency.p50_us - 3000.0).abs() < 1.0);
        assert!((latency.min_us - 1000.0).abs() < 1.0);
        assert!((latency.max_us - 5000.0).abs() < 1.0);
    }

    #[test]
    fn latency_csv_has_header_and_one_row_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("latency.csv");

        write_latency_csv(&csv_path, &sample_results()).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "path,worker_id,latency_microseconds");
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "/mnt/bench,3,1000");
        assert_eq!(lines[5], "/mnt/bench,3,5000");
    }

    #[test]
    fn csv_variant_inserts_suffix() {
        assert_eq!(
            latency_csv_variant(Path::new("out/latency.csv"), "write"),
            PathBuf::from("out/latency.write.csv")
        );
        assert_eq!(
            latency_csv_variant(Path::new("lat"), "read"),
            PathBuf::from("lat.read.csv")
        );
    }

    #[test]
    fn json_summary_round_trips_through_serde() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("summary.json");

        let mut writers = sample_results();
        let mut readers = BTreeMap::new();
        let summary = RunSummary::new(&mut writers, &mut readers);
        write_json_summary(&json_path, &summary).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["writers"][0]["total_bytes"], 10 * 1048576);
        assert_eq!(value["writers"][0]["per_worker"][0]["worker_id"], 3);
        assert!(value["readers"].as_array().unwrap().is_empty());
    }
}
