// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The benchmark tests every implementation runs.

use rpcbench_core::{HarnessConfig, LoadError, Payload, Transport};

use crate::harness::{BenchmarkHarness, LoadGenerator, Measurement, UnaryPlan};
use crate::metrics::BenchmarkRecord;

/// Input of the unary tests.
pub const SIMPLE_CALL_INPUT: i64 = 42;

/// What a test sends.
#[derive(Debug, Clone, PartialEq)]
pub enum TestLoad {
    Unary(UnaryPlan),
    Stream { count: u64 },
}

/// One named test.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteTest {
    pub name: String,
    pub load: TestLoad,
}

impl SuiteTest {
    pub fn unary(name: impl Into<String>, plan: UnaryPlan) -> Self {
        Self {
            name: name.into(),
            load: TestLoad::Unary(plan),
        }
    }

    pub fn stream(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            load: TestLoad::Stream { count },
        }
    }

    /// Operations in one measured batch; per-operation figures divide by it.
    pub fn operations_per_run(&self) -> u64 {
        match &self.load {
            TestLoad::Unary(plan) => plan.len() as u64,
            TestLoad::Stream { count } => (*count).max(1),
        }
    }
}

/// Records produced for one implementation and the tests that failed.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub records: Vec<BenchmarkRecord>,
    pub failures: Vec<(String, LoadError)>,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.records.is_empty()
    }
}

/// Ordered list of tests plus the generator and harness that run them.
pub struct BenchmarkSuite {
    tests: Vec<SuiteTest>,
    generator: LoadGenerator,
    warmup_rounds: u32,
    rounds: u32,
}

impl BenchmarkSuite {
    /// The standard tests: simple call, stream, large payloads and one
    /// sweep step per concurrency level.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut tests = vec![
            SuiteTest::unary(
                "simple_call",
                UnaryPlan::repeated(
                    Payload::Int(SIMPLE_CALL_INPUT),
                    config.total_calls,
                    config.concurrency_limit,
                ),
            ),
            SuiteTest::stream("stream_values", config.stream_count),
            SuiteTest::unary("large_payload", UnaryPlan::large_payloads(&config.payload_sizes)),
        ];
        tests.extend(config.sweep_levels.iter().map(|&level| {
            SuiteTest::unary(
                format!("concurrency_sweep_c{}", level),
                UnaryPlan::sweep(config.sweep_total_calls, level),
            )
        }));

        Self {
            tests,
            generator: LoadGenerator::new(config.call_timeout, config.batch_timeout),
            warmup_rounds: config.warmup_rounds,
            rounds: config.rounds,
        }
    }

    pub fn with_tests(mut self, tests: Vec<SuiteTest>) -> Self {
        self.tests = tests;
        self
    }

    /// Keep only tests whose name contains `pattern`.
    pub fn with_filter(mut self, pattern: Option<&str>) -> Self {
        if let Some(pattern) = pattern {
            self.tests.retain(|test| test.name.contains(pattern));
        }
        self
    }

    pub fn tests(&self) -> &[SuiteTest] {
        &self.tests
    }

    /// Run every test in order. A failing test is recorded and the rest
    /// still run.
    pub async fn run(&self, transport: &dyn Transport) -> SuiteReport {
        let mut report = SuiteReport::default();

        for test in &self.tests {
            tracing::info!(kind = %transport.kind(), test = %test.name, "Running test");
            match self.run_test(transport, test).await {
                Ok(measurement) => {
                    tracing::info!(
                        kind = %transport.kind(),
                        test = %test.name,
                        mean_s = measurement.stats.mean,
                        rounds = measurement.stats.rounds,
                        "Test complete"
                    );
                    report.records.push(self.record(transport, test, measurement));
                }
                Err(e) => {
                    tracing::error!(
                        kind = %transport.kind(),
                        test = %test.name,
                        error = %e,
                        "Test failed"
                    );
                    report.failures.push((test.name.clone(), e));
                }
            }
        }

        report
    }

    async fn run_test(
        &self,
        transport: &dyn Transport,
        test: &SuiteTest,
    ) -> Result<Measurement, LoadError> {
        let harness = BenchmarkHarness::new()
            .warmup(self.warmup_rounds)
            .rounds(self.rounds);
        let generator = &self.generator;

        match &test.load {
            TestLoad::Unary(plan) => {
                harness
                    .run(&test.name, || generator.run_unary(transport, plan))
                    .await
            }
            TestLoad::Stream { count } => {
                let count = *count;
                harness
                    .run(&test.name, || generator.run_stream(transport, count))
                    .await
            }
        }
    }

    fn record(
        &self,
        transport: &dyn Transport,
        test: &SuiteTest,
        m: Measurement,
    ) -> BenchmarkRecord {
        let mut record = BenchmarkRecord::new(test.name.clone(), m.stats)
            .with_operations(test.operations_per_run())
            .with_outcomes(m.outcomes)
            .with_metadata("transport", transport.kind())
            .with_metadata("sharing", transport.sharing())
            .with_metadata("peak_in_flight", m.peak_in_flight);

        match &test.load {
            TestLoad::Unary(plan) => {
                record = record
                    .with_metadata("total_calls", plan.len())
                    .with_metadata("concurrency_limit", plan.concurrency_limit);
                if matches!(plan.calls.first(), Some(Payload::Text(_))) {
                    let sizes: Vec<usize> = plan.calls.iter().map(Payload::len).collect();
                    record = record.with_metadata("payload_sizes", sizes);
                }
            }
            TestLoad::Stream { count } => {
                record = record.with_metadata("stream_count", count);
                if let Some(trace) = m.stream {
                    record = record.with_metadata("stream", trace);
                }
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcbench_core::transport::InProcessTransport;
    use rpcbench_core::Config;

    fn quick_config() -> HarnessConfig {
        let mut config = Config::default().harness;
        config.rounds = 2;
        config.warmup_rounds = 0;
        config.total_calls = 10;
        config.stream_count = 100;
        config.payload_sizes = vec![16, 64];
        config.sweep_levels = vec![1, 4];
        config.sweep_total_calls = 8;
        config
    }

    #[test]
    fn test_standard_tests() {
        let suite = BenchmarkSuite::from_config(&Config::default().harness);
        let names: Vec<&str> = suite.tests().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "simple_call",
                "stream_values",
                "large_payload",
                "concurrency_sweep_c1",
                "concurrency_sweep_c5",
                "concurrency_sweep_c10",
                "concurrency_sweep_c20",
                "concurrency_sweep_c50",
                "concurrency_sweep_c100",
            ]
        );

        let ops: Vec<u64> = suite.tests().iter().map(SuiteTest::operations_per_run).collect();
        assert_eq!(ops, vec![50, 1000, 4, 200, 200, 200, 200, 200, 200]);
    }

    #[test]
    fn test_filter() {
        let suite = BenchmarkSuite::from_config(&quick_config()).with_filter(Some("sweep"));
        assert_eq!(suite.tests().len(), 2);

        let suite = BenchmarkSuite::from_config(&quick_config()).with_filter(Some("nothing"));
        assert!(suite.tests().is_empty());
    }

    #[tokio::test]
    async fn test_run_in_process() {
        let transport = InProcessTransport::new();
        transport.setup().await.unwrap();

        let report = BenchmarkSuite::from_config(&quick_config()).run(&transport).await;

        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert_eq!(report.records.len(), 5);

        let stream = &report.records[1];
        assert_eq!(stream.name, "stream_values");
        assert_eq!(stream.operations_per_run, Some(100));
        assert_eq!(stream.stats.rounds, 2);
        assert_eq!(stream.metadata["stream"]["in_order"], true);

        let large = &report.records[2];
        assert_eq!(large.metadata["payload_sizes"], serde_json::json!([16, 64]));
        assert_eq!(large.outcomes.success, 4);
    }

    #[tokio::test]
    async fn test_failed_test_does_not_stop_suite() {
        // Never set up, so every call fails.
        let transport = InProcessTransport::new();
        let report = BenchmarkSuite::from_config(&quick_config())
            .with_filter(Some("simple"))
            .run(&transport)
            .await;

        assert!(!report.is_success());
        assert!(report.records.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "simple_call");
    }
}
