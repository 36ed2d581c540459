// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-implementation comparison of stored results.
//!
//! Reads every `<implementation>_results.json` in a run directory, normalizes
//! batch timings to per-operation figures and ranks implementations per test.
//! The fastest implementation of a test is its baseline; every other entry is
//! reported relative to it.
//!
//! Output is deterministic: files are read in name order, all maps are
//! ordered and equal means go to the lexically smallest implementation name.
//! Unreadable files are skipped with a warning, so a directory with no usable
//! data yields an empty summary rather than an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rpcbench_core::AggregationError;

use crate::metrics::RoundStats;

/// Suffix of per-implementation result files.
pub const RESULT_FILE_SUFFIX: &str = "_results.json";

/// Name of the aggregated output file.
pub const PROCESSED_FILE: &str = "processed_results.json";

/// One record of one implementation, normalized per operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub implementation: String,
    pub test: String,
    pub operations_per_run: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub stddev: f64,
    pub ops_per_sec: f64,
    pub rounds: u64,
}

/// How one implementation did on one test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonEntry {
    /// Mean seconds per operation.
    pub mean_time: f64,
    /// `mean_time` over the fastest mean of the test.
    pub relative: f64,
    pub ops_per_sec: f64,
    pub is_fastest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Winner {
    pub implementation: String,
    pub mean_time: f64,
    pub ops_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub fastest_by_test: BTreeMap<String, Winner>,
    pub test_count: usize,
    pub total_rounds: u64,
    pub implementations: Vec<String>,
    pub win_counts: BTreeMap<String, u64>,
}

/// Test → implementation → entry.
pub type Comparisons = BTreeMap<String, BTreeMap<String, ComparisonEntry>>;

/// Contents of `processed_results.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessedResults {
    pub comparisons: Comparisons,
    pub summary: Summary,
}

impl ProcessedResults {
    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// The parts of a result file the aggregator needs. Unknown fields are
/// ignored so files written by other tools with the same layout also load.
#[derive(Debug, Deserialize)]
struct ResultDocument {
    #[serde(default)]
    benchmarks: Vec<RecordDocument>,
}

#[derive(Debug, Deserialize)]
struct RecordDocument {
    name: String,
    stats: RoundStats,
    #[serde(default)]
    operations_per_run: Option<u64>,
}

/// Implementation name encoded in a result file name: everything before the
/// first underscore of `<implementation>_results.json`.
pub fn implementation_name(file_name: &str) -> Option<&str> {
    if !file_name.ends_with(RESULT_FILE_SUFFIX) || file_name == PROCESSED_FILE {
        return None;
    }
    file_name.split('_').next().filter(|name| !name.is_empty())
}

/// Test name with any `[parameter]` suffix removed.
pub fn test_name(record_name: &str) -> &str {
    record_name.split('[').next().unwrap_or(record_name)
}

/// Aggregates the result files of one run directory.
#[derive(Debug, Clone)]
pub struct Aggregator {
    results_dir: PathBuf,
}

impl Aggregator {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Result files in name order.
    pub fn result_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.results_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    path = %self.results_dir.display(),
                    error = %e,
                    "Results directory not readable"
                );
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .and_then(implementation_name)
                        .is_some()
            })
            .collect();
        files.sort();

        if files.is_empty() {
            tracing::warn!(path = %self.results_dir.display(), "No result files found");
        }
        files
    }

    /// Observations from every readable result file.
    pub fn load(&self) -> Vec<Observation> {
        let mut observations = Vec::new();
        for path in self.result_files() {
            match load_file(&path) {
                Ok(mut file_observations) => observations.append(&mut file_observations),
                Err(e) => tracing::warn!(error = %e, "Skipping result file"),
            }
        }
        if observations.is_empty() {
            tracing::warn!(path = %self.results_dir.display(), "No valid benchmark data found");
        }
        observations
    }

    /// Comparisons and summary of the directory; empty when there is no data.
    pub fn process(&self) -> ProcessedResults {
        process_observations(&self.load())
    }

    /// Like [`Aggregator::process`], but no data is an error.
    pub fn require_data(&self) -> Result<ProcessedResults, AggregationError> {
        let results = self.process();
        if results.is_empty() {
            return Err(AggregationError::NoData {
                path: self.results_dir.clone(),
            });
        }
        Ok(results)
    }
}

fn load_file(path: &Path) -> Result<Vec<Observation>, AggregationError> {
    let malformed = |reason: String| AggregationError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let implementation = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(implementation_name)
        .ok_or_else(|| malformed("not a result file name".to_string()))?
        .to_string();

    let content = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    if content.trim().is_empty() {
        return Err(malformed("file is empty".to_string()));
    }

    let document: ResultDocument =
        serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;
    if document.benchmarks.is_empty() {
        return Err(malformed("no benchmarks".to_string()));
    }

    let mut observations = Vec::with_capacity(document.benchmarks.len());
    for record in &document.benchmarks {
        let stats = &record.stats;
        if !stats.mean.is_finite() || stats.mean < 0.0 {
            tracing::warn!(
                path = %path.display(),
                benchmark = %record.name,
                mean = stats.mean,
                "Skipping record with invalid mean"
            );
            continue;
        }
        observations.push(normalize(
            &implementation,
            &record.name,
            stats,
            record.operations_per_run,
        ));
    }
    Ok(observations)
}

/// Per-operation figures of one record.
///
/// A record without `operations_per_run` is taken as one operation per
/// batch. A zero mean gives infinite throughput.
pub fn normalize(
    implementation: &str,
    record_name: &str,
    stats: &RoundStats,
    operations_per_run: Option<u64>,
) -> Observation {
    let ops = match operations_per_run {
        Some(ops) if ops > 0 => ops,
        Some(_) | None => {
            tracing::debug!(
                implementation,
                benchmark = record_name,
                "No operations_per_run, assuming one operation per batch"
            );
            1
        }
    };
    let scale = ops as f64;

    let ops_per_sec = if stats.mean > 0.0 {
        scale / stats.mean
    } else {
        tracing::warn!(
            implementation,
            benchmark = record_name,
            "Zero mean time, throughput is unbounded"
        );
        f64::INFINITY
    };

    Observation {
        implementation: implementation.to_string(),
        test: test_name(record_name).to_string(),
        operations_per_run: ops,
        mean: stats.mean / scale,
        min: stats.min / scale,
        max: stats.max / scale,
        median: stats.median / scale,
        stddev: stats.stddev / scale,
        ops_per_sec,
        rounds: stats.rounds,
    }
}

/// Latest observation per test and implementation.
fn by_test(observations: &[Observation]) -> BTreeMap<&str, BTreeMap<&str, &Observation>> {
    let mut tests: BTreeMap<&str, BTreeMap<&str, &Observation>> = BTreeMap::new();
    for observation in observations {
        tests
            .entry(observation.test.as_str())
            .or_default()
            .insert(observation.implementation.as_str(), observation);
    }
    tests
}

/// Fastest entry; on equal means the first in name order wins.
fn fastest<'a>(entries: &BTreeMap<&str, &'a Observation>) -> Option<&'a Observation> {
    let mut best: Option<&Observation> = None;
    for &observation in entries.values() {
        match best {
            Some(current) if observation.mean >= current.mean => {}
            _ => best = Some(observation),
        }
    }
    best
}

fn relative(mean: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        mean / baseline
    } else if mean > 0.0 {
        f64::INFINITY
    } else {
        1.0
    }
}

/// Rank implementations within each test.
pub fn compare(observations: &[Observation]) -> Comparisons {
    let mut comparisons = Comparisons::new();
    for (test, entries) in by_test(observations) {
        let Some(winner) = fastest(&entries) else {
            continue;
        };
        let row = entries
            .iter()
            .map(|(implementation, observation)| {
                let entry = ComparisonEntry {
                    mean_time: observation.mean,
                    relative: relative(observation.mean, winner.mean),
                    ops_per_sec: observation.ops_per_sec,
                    is_fastest: *implementation == winner.implementation,
                };
                (implementation.to_string(), entry)
            })
            .collect();
        comparisons.insert(test.to_string(), row);
    }
    comparisons
}

/// Winners, win counts and totals.
pub fn summarize(observations: &[Observation]) -> Summary {
    let mut summary = Summary {
        total_rounds: observations.iter().map(|o| o.rounds).sum(),
        ..Summary::default()
    };

    let mut implementations: Vec<String> = observations
        .iter()
        .map(|o| o.implementation.clone())
        .collect();
    implementations.sort();
    implementations.dedup();
    summary.implementations = implementations;

    let tests = by_test(observations);
    summary.test_count = tests.len();
    for (test, entries) in tests {
        if let Some(winner) = fastest(&entries) {
            *summary
                .win_counts
                .entry(winner.implementation.clone())
                .or_insert(0) += 1;
            summary.fastest_by_test.insert(
                test.to_string(),
                Winner {
                    implementation: winner.implementation.clone(),
                    mean_time: winner.mean,
                    ops_per_sec: winner.ops_per_sec,
                },
            );
        }
    }
    summary
}

pub fn process_observations(observations: &[Observation]) -> ProcessedResults {
    ProcessedResults {
        comparisons: compare(observations),
        summary: summarize(observations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn stats(mean: f64, rounds: u64) -> RoundStats {
        RoundStats {
            mean,
            min: mean / 2.0,
            max: mean * 2.0,
            median: mean,
            stddev: 0.0,
            rounds,
        }
    }

    fn observation(implementation: &str, test: &str, mean: f64) -> Observation {
        normalize(implementation, test, &stats(mean, 5), None)
    }

    fn write_result(dir: &Path, implementation: &str, benchmarks: serde_json::Value) {
        let document = json!({ "implementation": implementation, "benchmarks": benchmarks });
        fs::write(
            dir.join(format!("{}{}", implementation, RESULT_FILE_SUFFIX)),
            serde_json::to_string_pretty(&document).unwrap(),
        )
        .unwrap();
    }

    fn record(name: &str, mean: f64, ops: Option<u64>) -> serde_json::Value {
        let mut value = json!({
            "name": name,
            "stats": {
                "mean": mean,
                "min": mean,
                "max": mean,
                "median": mean,
                "stddev": 0.0,
                "rounds": 5
            },
        });
        if let Some(ops) = ops {
            value["operations_per_run"] = json!(ops);
        }
        value
    }

    #[test]
    fn test_name_parsing() {
        assert_eq!(
            implementation_name("framed-isolated_results.json"),
            Some("framed-isolated")
        );
        assert_eq!(implementation_name("grpc_async_results.json"), Some("grpc"));
        assert_eq!(implementation_name(PROCESSED_FILE), None);
        assert_eq!(implementation_name("notes.json"), None);
        assert_eq!(implementation_name("_results.json"), None);

        assert_eq!(test_name("test_simple_call[grpc]"), "test_simple_call");
        assert_eq!(test_name("simple_call"), "simple_call");
    }

    #[test]
    fn test_normalization() {
        let o = normalize("threaded", "simple_call", &stats(0.5, 5), Some(50));
        assert!((o.mean - 0.01).abs() < 1e-12);
        assert!((o.ops_per_sec - 100.0).abs() < 1e-9);
        assert_eq!(o.operations_per_run, 50);

        let o = normalize("threaded", "simple_call", &stats(0.5, 5), None);
        assert!((o.ops_per_sec - 2.0).abs() < 1e-12);
        assert_eq!(o.operations_per_run, 1);
    }

    #[test]
    fn test_zero_mean() {
        let o = normalize("in-process", "simple_call", &stats(0.0, 1), Some(10));
        assert!(o.ops_per_sec.is_infinite());

        let results = process_observations(&[o]);
        let entry = &results.comparisons["simple_call"]["in-process"];
        assert_eq!(entry.relative, 1.0);
        assert!(entry.is_fastest);
    }

    #[test]
    fn test_ranking_invariant() {
        let observations = vec![
            observation("broker", "simple_call", 0.4),
            observation("framed", "simple_call", 0.1),
            observation("threaded", "simple_call", 0.2),
            observation("framed", "stream_values", 0.3),
            observation("threaded", "stream_values", 0.3),
            observation("broker", "large_payload", 0.7),
        ];
        let comparisons = compare(&observations);

        for (test, row) in &comparisons {
            let fastest: Vec<_> = row.iter().filter(|(_, e)| e.is_fastest).collect();
            assert_eq!(fastest.len(), 1, "{}", test);
            assert_eq!(fastest[0].1.relative, 1.0);
            assert!(row.values().all(|e| e.relative >= 1.0), "{}", test);
        }

        let simple = &comparisons["simple_call"];
        assert!((simple["broker"].relative - 4.0).abs() < 1e-9);
        assert!((simple["threaded"].relative - 2.0).abs() < 1e-9);

        // Equal means go to the lexically smallest name.
        assert!(comparisons["stream_values"]["framed"].is_fastest);
        assert!(!comparisons["stream_values"]["threaded"].is_fastest);

        // A test with a single implementation is won by it.
        assert!(comparisons["large_payload"]["broker"].is_fastest);
    }

    #[test]
    fn test_summary() {
        let observations = vec![
            observation("threaded", "simple_call", 0.2),
            observation("framed", "simple_call", 0.1),
            observation("threaded", "stream_values", 0.1),
            observation("framed", "stream_values", 0.3),
            observation("framed", "large_payload", 0.3),
        ];
        let summary = summarize(&observations);

        assert_eq!(summary.test_count, 3);
        assert_eq!(summary.total_rounds, 25);
        assert_eq!(summary.implementations, vec!["framed", "threaded"]);
        assert_eq!(summary.fastest_by_test["simple_call"].implementation, "framed");
        assert_eq!(summary.fastest_by_test["stream_values"].implementation, "threaded");
        assert_eq!(summary.win_counts["framed"], 2);
        assert_eq!(summary.win_counts["threaded"], 1);
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let results = Aggregator::new(temp_dir.path()).process();

        assert!(results.is_empty());
        assert_eq!(results.summary, Summary::default());
        let json: serde_json::Value = serde_json::from_str(&results.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "comparisons": {},
                "summary": {
                    "fastest_by_test": {},
                    "test_count": 0,
                    "total_rounds": 0,
                    "implementations": [],
                    "win_counts": {}
                }
            })
        );

        assert!(matches!(
            Aggregator::new(temp_dir.path()).require_data(),
            Err(AggregationError::NoData { .. })
        ));
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let results = Aggregator::new(temp_dir.path().join("missing")).process();
        assert!(results.is_empty());
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("empty_results.json"), "").unwrap();
        fs::write(dir.join("garbage_results.json"), "{ not json").unwrap();
        write_result(dir, "none", json!([]));
        write_result(dir, "framed", json!([record("simple_call", 0.5, Some(50))]));
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let results = Aggregator::new(dir).require_data().unwrap();
        assert_eq!(results.summary.implementations, vec!["framed"]);
        assert_eq!(results.summary.test_count, 1);
    }

    #[test]
    fn test_directory_aggregation_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_result(
            dir,
            "threaded",
            json!([
                record("simple_call", 0.5, Some(50)),
                record("stream_values[1000]", 0.2, Some(1000)),
            ]),
        );
        write_result(
            dir,
            "broker-isolated",
            json!([
                record("simple_call", 0.25, Some(50)),
                record("stream_values[1000]", 0.4, Some(1000)),
            ]),
        );

        let aggregator = Aggregator::new(dir);
        let first = aggregator.process().to_json().unwrap();
        fs::write(dir.join(PROCESSED_FILE), &first).unwrap();
        let second = aggregator.process().to_json().unwrap();
        assert_eq!(first, second);

        let results = aggregator.process();
        assert_eq!(
            results.summary.fastest_by_test["simple_call"].implementation,
            "broker-isolated"
        );
        assert_eq!(
            results.summary.fastest_by_test["stream_values"].implementation,
            "threaded"
        );
        let winner = &results.summary.fastest_by_test["simple_call"];
        assert!((winner.mean_time - 0.005).abs() < 1e-12);
        assert!((winner.ops_per_sec - 200.0).abs() < 1e-9);
    }
}
