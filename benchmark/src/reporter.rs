// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON persistence of benchmark runs.
//!
//! Each run gets a timestamped directory under the output directory, and
//! `latest` points at the most recent one. Inside a run directory there is one
//! `<implementation>_results.json` per implementation plus the aggregated
//! `processed_results.json`.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;

use crate::aggregate::{
    implementation_name, ProcessedResults, PROCESSED_FILE, RESULT_FILE_SUFFIX,
};
use crate::metrics::{format_seconds, ResultFile};

/// Name of the link to the most recent run directory.
pub const LATEST_LINK: &str = "latest";

/// Errors that can occur while writing or reading reports.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ReporterError + '_ {
    move |source| ReporterError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// JSON reporter rooted at an output directory.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a reporter, creating the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).map_err(io_error(&output_dir))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create `<output_dir>/<YYYYmmdd_HHMMSS>/` and point `latest` at it.
    pub fn create_run_dir(&self) -> Result<PathBuf, ReporterError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut name = stamp.clone();
        let mut suffix = 1;
        while self.output_dir.join(&name).exists() {
            suffix += 1;
            name = format!("{}_{}", stamp, suffix);
        }

        let run_dir = self.output_dir.join(&name);
        fs::create_dir_all(&run_dir).map_err(io_error(&run_dir))?;
        self.update_latest(&name);

        tracing::info!(path = %run_dir.display(), "Created run directory");
        Ok(run_dir)
    }

    /// Failures are logged, not returned.
    fn update_latest(&self, run_name: &str) {
        let link = self.output_dir.join(LATEST_LINK);
        if let Ok(meta) = fs::symlink_metadata(&link) {
            if meta.is_dir() {
                tracing::warn!(path = %link.display(), "Not replacing directory named latest");
                return;
            }
            if let Err(e) = fs::remove_file(&link) {
                tracing::warn!(path = %link.display(), error = %e, "Failed to remove old link");
                return;
            }
        }

        #[cfg(unix)]
        let result = std::os::unix::fs::symlink(run_name, &link);
        #[cfg(not(unix))]
        let result = fs::write(&link, self.output_dir.join(run_name).to_string_lossy().into_owned());

        if let Err(e) = result {
            tracing::warn!(path = %link.display(), error = %e, "Failed to update latest link");
        }
    }

    /// Write `<implementation>_results.json` into `run_dir`.
    pub fn save_result(
        &self,
        run_dir: &Path,
        result: &ResultFile,
    ) -> Result<PathBuf, ReporterError> {
        let path = run_dir.join(format!("{}{}", result.implementation, RESULT_FILE_SUFFIX));
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, result)?;
        writer.flush().map_err(io_error(&path))?;

        tracing::debug!(
            path = %path.display(),
            records = result.benchmarks.len(),
            "Saved results"
        );
        Ok(path)
    }

    /// Write aggregated results to `path`.
    pub fn save_processed(path: &Path, results: &ProcessedResults) -> Result<(), ReporterError> {
        let json = results.to_json()?;
        fs::write(path, json).map_err(io_error(path))?;
        tracing::info!(path = %path.display(), "Saved processed results");
        Ok(())
    }

    /// Where `processed_results.json` goes in a run directory.
    pub fn processed_path(run_dir: &Path) -> PathBuf {
        run_dir.join(PROCESSED_FILE)
    }

    /// Result files of a run directory in name order.
    pub fn list_result_files(run_dir: &Path) -> Result<Vec<PathBuf>, ReporterError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(run_dir).map_err(io_error(run_dir))? {
            let path = entry.map_err(io_error(run_dir))?.path();
            let is_result = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(implementation_name)
                .is_some();
            if is_result {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load a result file.
    pub fn load(path: impl AsRef<Path>) -> Result<ResultFile, ReporterError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(io_error(path))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Follow a `latest` link, or a `latest` file holding a path, to the run
/// directory it names. Other paths are returned unchanged.
pub fn resolve_results_dir(path: &Path) -> PathBuf {
    let is_latest = path.file_name().map_or(false, |name| name == LATEST_LINK);
    if !is_latest {
        return path.to_path_buf();
    }

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(path) {
            Ok(resolved) => {
                tracing::debug!(
                    from = %path.display(),
                    to = %resolved.display(),
                    "Resolved latest"
                );
                resolved
            }
            Err(_) => path.to_path_buf(),
        },
        Ok(meta) if meta.is_file() => match fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => PathBuf::from(content.trim()),
            _ => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Plain-text comparison table for the console.
pub fn format_summary(results: &ProcessedResults) -> String {
    let mut out = String::new();
    if results.is_empty() {
        out.push_str("No benchmark data.\n");
        return out;
    }

    for (test, row) in &results.comparisons {
        let _ = writeln!(out, "{}", test);
        let _ = writeln!(
            out,
            "  {:<2}{:<24} {:>12} {:>10} {:>14}",
            "", "implementation", "mean/op", "relative", "ops/s"
        );

        let mut entries: Vec<_> = row.iter().collect();
        entries.sort_by(|a, b| a.1.mean_time.total_cmp(&b.1.mean_time).then(a.0.cmp(b.0)));
        for (implementation, entry) in entries {
            let _ = writeln!(
                out,
                "  {:<2}{:<24} {:>12} {:>9.2}x {:>14.1}",
                if entry.is_fastest { "*" } else { "" },
                implementation,
                format_seconds(entry.mean_time),
                entry.relative,
                entry.ops_per_sec
            );
        }
        out.push('\n');
    }

    let summary = &results.summary;
    let _ = writeln!(
        out,
        "{} test(s), {} implementation(s), {} round(s)",
        summary.test_count,
        summary.implementations.len(),
        summary.total_rounds
    );
    let mut wins: Vec<_> = summary.win_counts.iter().collect();
    wins.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (implementation, count) in wins {
        let _ = writeln!(out, "  {:<24} {} win(s)", implementation, count);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::metrics::{BenchmarkRecord, RoundStats};
    use rpcbench_core::TransportKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn result_file(implementation: &str, kind: TransportKind, mean_ms: u64) -> ResultFile {
        let mut result = ResultFile::new(implementation, kind, false);
        result.add_record(
            BenchmarkRecord::new(
                "simple_call",
                RoundStats::from_durations(&[Duration::from_millis(mean_ms)]),
            )
            .with_operations(50),
        );
        result
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();
        let run_dir = reporter.create_run_dir().unwrap();

        let path = reporter
            .save_result(&run_dir, &result_file("threaded", TransportKind::Threaded, 10))
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "threaded_results.json");

        let loaded = JsonReporter::load(&path).unwrap();
        assert_eq!(loaded.implementation, "threaded");
        assert_eq!(loaded.kind, TransportKind::Threaded);
        assert_eq!(loaded.benchmarks[0].operations_per_run, Some(50));
    }

    #[test]
    fn test_run_dirs_and_latest_link() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path().join("results")).unwrap();

        let first = reporter.create_run_dir().unwrap();
        let second = reporter.create_run_dir().unwrap();
        assert_ne!(first, second);

        let latest = reporter.output_dir().join(LATEST_LINK);
        assert_eq!(
            resolve_results_dir(&latest),
            fs::canonicalize(&second).unwrap()
        );
        assert_eq!(resolve_results_dir(&first), first);
    }

    #[test]
    fn test_latest_file_holding_path() {
        let temp_dir = TempDir::new().unwrap();
        let run_dir = temp_dir.path().join("20250101_000000");
        fs::create_dir(&run_dir).unwrap();
        let latest = temp_dir.path().join(LATEST_LINK);
        fs::write(&latest, format!("{}\n", run_dir.display())).unwrap();

        assert_eq!(resolve_results_dir(&latest), run_dir);
    }

    #[test]
    fn test_list_result_files_skips_processed() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();
        let run_dir = reporter.create_run_dir().unwrap();

        reporter
            .save_result(&run_dir, &result_file("threaded", TransportKind::Threaded, 10))
            .unwrap();
        reporter
            .save_result(&run_dir, &result_file("broker", TransportKind::Broker, 5))
            .unwrap();
        let processed = Aggregator::new(&run_dir).process();
        JsonReporter::save_processed(&JsonReporter::processed_path(&run_dir), &processed).unwrap();

        let files = JsonReporter::list_result_files(&run_dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["broker_results.json", "threaded_results.json"]);
    }

    #[test]
    fn test_format_summary() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();
        let run_dir = reporter.create_run_dir().unwrap();
        reporter
            .save_result(&run_dir, &result_file("threaded", TransportKind::Threaded, 10))
            .unwrap();
        reporter
            .save_result(&run_dir, &result_file("broker", TransportKind::Broker, 5))
            .unwrap();

        let text = format_summary(&Aggregator::new(&run_dir).process());
        assert!(text.starts_with("simple_call\n"));
        assert!(text.contains("* broker"));
        assert!(text.contains("2.00x"));
        assert!(text
            .lines()
            .any(|line| line.trim_start().starts_with("broker") && line.ends_with("1 win(s)")));

        assert_eq!(format_summary(&ProcessedResults::default()), "No benchmark data.\n");
    }
}
