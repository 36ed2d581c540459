// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmarks every configured implementation in turn.
//!
//! For each implementation: set up its backend, run the suite under the
//! implementation deadline, persist the records and tear the backend down,
//! also when an earlier step failed. A failure is recorded against its phase
//! and the next implementation still runs. The run directory is aggregated
//! at the end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use rpcbench_core::{
    BackendTarget, BenchError, BenchResult, Config, HardValidationError, ImplementationConfig,
    LifecycleCoordinator, LifecycleSettings, LoadError,
};

use crate::aggregate::{Aggregator, ProcessedResults};
use crate::metrics::ResultFile;
use crate::reporter::{JsonReporter, ReporterError};
use crate::suite::{BenchmarkSuite, SuiteReport};

/// Added to the shutdown grace to bound a whole teardown.
const TEARDOWN_MARGIN: Duration = Duration::from_secs(10);

/// Step of an implementation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Load,
    Persist,
    Teardown,
    Aggregation,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Load => write!(f, "load"),
            Phase::Persist => write!(f, "persist"),
            Phase::Teardown => write!(f, "teardown"),
            Phase::Aggregation => write!(f, "aggregation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplementationFailure {
    pub implementation: String,
    pub phase: Phase,
    pub error: String,
}

impl ImplementationFailure {
    pub fn new(implementation: impl Into<String>, phase: Phase, error: impl ToString) -> Self {
        Self {
            implementation: implementation.into(),
            phase,
            error: error.to_string(),
        }
    }
}

/// What one implementation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplementationRun {
    pub implementation: String,
    pub result_file: Option<PathBuf>,
    pub records: usize,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub implementations: Vec<ImplementationRun>,
    pub failures: Vec<ImplementationFailure>,
    pub processed: ProcessedResults,
    pub processed_path: Option<PathBuf>,
}

impl RunReport {
    /// No implementation failed and there is data to compare.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.processed.is_empty()
    }
}

pub struct Orchestrator {
    config: Config,
    coordinator: LifecycleCoordinator,
    test_filter: Option<String>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let coordinator = LifecycleCoordinator::new(LifecycleSettings::from_config(&config));
        Self {
            config,
            coordinator,
            test_filter: None,
        }
    }

    /// Only run tests whose name contains `pattern`.
    pub fn with_test_filter(mut self, pattern: Option<String>) -> Self {
        self.test_filter = pattern;
        self
    }

    /// Replace the coordinator settings, e.g. to point at another server
    /// program.
    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.coordinator = LifecycleCoordinator::new(settings);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every implementation and aggregate the results.
    ///
    /// Returns an error only when nothing can be run at all: the test filter
    /// matches no test or the run directory cannot be created. Everything
    /// else ends up in [`RunReport::failures`].
    pub async fn run(&self) -> BenchResult<RunReport> {
        let suite = BenchmarkSuite::from_config(&self.config.harness)
            .with_filter(self.test_filter.as_deref());
        if suite.tests().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "test",
                value: self.test_filter.clone().unwrap_or_default(),
                reason: "matches no benchmark test".to_string(),
            }
            .into());
        }

        let reporter = JsonReporter::new(&self.config.output_dir).map_err(persist_error)?;
        let run_dir = reporter.create_run_dir().map_err(persist_error)?;

        tracing::info!(
            implementations = self.config.implementations.len(),
            tests = suite.tests().len(),
            run_dir = %run_dir.display(),
            "Starting benchmark run"
        );

        let mut implementations = Vec::with_capacity(self.config.implementations.len());
        let mut failures = Vec::new();
        for implementation in &self.config.implementations {
            let (run, mut implementation_failures) = self
                .run_implementation(&suite, &reporter, &run_dir, implementation)
                .await;
            implementations.push(run);
            failures.append(&mut implementation_failures);
        }

        let processed = Aggregator::new(&run_dir).process();
        let mut processed_path = None;
        if processed.is_empty() {
            failures.push(ImplementationFailure::new(
                "*",
                Phase::Aggregation,
                format!("no valid benchmark data in {}", run_dir.display()),
            ));
        } else {
            let path = JsonReporter::processed_path(&run_dir);
            match JsonReporter::save_processed(&path, &processed) {
                Ok(()) => processed_path = Some(path),
                Err(e) => failures.push(ImplementationFailure::new("*", Phase::Aggregation, e)),
            }
        }

        for failure in &failures {
            tracing::error!(
                implementation = %failure.implementation,
                phase = %failure.phase,
                error = %failure.error,
                "Implementation failed"
            );
        }

        Ok(RunReport {
            run_dir,
            implementations,
            failures,
            processed,
            processed_path,
        })
    }

    async fn run_implementation(
        &self,
        suite: &BenchmarkSuite,
        reporter: &JsonReporter,
        run_dir: &Path,
        implementation: &ImplementationConfig,
    ) -> (ImplementationRun, Vec<ImplementationFailure>) {
        let name = implementation.name();
        let mut failures = Vec::new();
        let mut run = ImplementationRun {
            implementation: name.clone(),
            result_file: None,
            records: 0,
        };

        tracing::info!(implementation = %name, "Benchmarking implementation");

        let target = BackendTarget::from(implementation);
        let mut handle = match self.coordinator.setup(&target).await {
            Ok(handle) => handle,
            Err(e) => {
                for line in e.captured_output() {
                    tracing::info!(implementation = %name, "backend: {}", line);
                }
                failures.push(ImplementationFailure::new(&name, Phase::Setup, e));
                return (run, failures);
            }
        };

        let report = match handle.transport() {
            Ok(transport) => {
                let deadline = self.config.harness.implementation_timeout;
                match tokio::time::timeout(deadline, suite.run(transport.as_ref())).await {
                    Ok(report) => Some(report),
                    Err(_) => {
                        let e = LoadError::Deadline {
                            test: format!("{} suite", name),
                            timeout_ms: deadline.as_millis() as u64,
                        };
                        failures.push(ImplementationFailure::new(&name, Phase::Load, e));
                        None
                    }
                }
            }
            Err(e) => {
                failures.push(ImplementationFailure::new(&name, Phase::Setup, e));
                None
            }
        };

        // Persist before teardown so results survive a hanging shutdown.
        if let Some(report) = report {
            self.persist(implementation, reporter, run_dir, report, &mut run, &mut failures);
        }

        let budget = self.coordinator.settings().shutdown_grace + TEARDOWN_MARGIN;
        if tokio::time::timeout(budget, self.coordinator.teardown(&mut handle))
            .await
            .is_err()
        {
            failures.push(ImplementationFailure::new(
                &name,
                Phase::Teardown,
                format!("teardown exceeded {}ms", budget.as_millis()),
            ));
        }

        (run, failures)
    }

    fn persist(
        &self,
        implementation: &ImplementationConfig,
        reporter: &JsonReporter,
        run_dir: &Path,
        report: SuiteReport,
        run: &mut ImplementationRun,
        failures: &mut Vec<ImplementationFailure>,
    ) {
        let name = implementation.name();
        for (_, e) in &report.failures {
            failures.push(ImplementationFailure::new(&name, Phase::Load, e));
        }
        if report.records.is_empty() {
            return;
        }

        let mut result = ResultFile::new(&name, implementation.kind, implementation.isolated);
        run.records = report.records.len();
        for record in report.records {
            result.add_record(record);
        }

        match reporter.save_result(run_dir, &result) {
            Ok(path) => {
                tracing::info!(implementation = %name, path = %path.display(), "Saved results");
                run.result_file = Some(path);
            }
            Err(e) => failures.push(ImplementationFailure::new(&name, Phase::Persist, e)),
        }
    }
}

fn persist_error(e: ReporterError) -> BenchError {
    match e {
        ReporterError::Io { source, .. } => BenchError::Io {
            context: "preparing results directory",
            source,
        },
        ReporterError::Serialization(source) => BenchError::Serialization {
            context: "preparing results directory",
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Setup.to_string(), "setup");
        assert_eq!(Phase::Aggregation.to_string(), "aggregation");
        assert_eq!(
            serde_json::to_value(Phase::Teardown).unwrap(),
            serde_json::json!("teardown")
        );
    }

    #[test]
    fn test_report_success() {
        let report = RunReport {
            run_dir: PathBuf::from("results/x"),
            implementations: Vec::new(),
            failures: Vec::new(),
            processed: ProcessedResults::default(),
            processed_path: None,
        };
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_filter_matching_nothing_is_rejected() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.output_dir = temp_dir.path().join("results");

        let err = Orchestrator::new(config)
            .with_test_filter(Some("no-such-test".to_string()))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::HardValidation(_)));
        assert!(!temp_dir.path().join("results").exists());
    }
}
