// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Measurement types for benchmark runs and persisted results.
//!
//! A [`RunSample`] is what one batch of calls produced; [`RoundStats`]
//! summarizes the wall times of several batches; [`ResultFile`] is the
//! per-implementation JSON document the aggregator reads back.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use rpcbench_core::{LoadError, Payload, TransportKind};

/// Classification of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Timeout,
    TransportError,
    ProtocolMismatch,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::Timeout => write!(f, "timeout"),
            OutcomeKind::TransportError => write!(f, "transport_error"),
            OutcomeKind::ProtocolMismatch => write!(f, "protocol_mismatch"),
        }
    }
}

/// What a successful call returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeValue {
    /// Unary result.
    Payload(Payload),
    /// Number of stream items received.
    Items(u64),
}

/// Result of one call. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub elapsed: Duration,
    pub kind: OutcomeKind,
    pub value: Option<OutcomeValue>,
    pub error: Option<String>,
}

impl CallOutcome {
    pub fn success(elapsed: Duration, value: OutcomeValue) -> Self {
        Self {
            elapsed,
            kind: OutcomeKind::Success,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(kind: OutcomeKind, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            elapsed,
            kind,
            value: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// Observations made while draining a stream.
///
/// Item arrivals are kept as first/last offsets plus the largest and mean
/// gap between consecutive items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTrace {
    pub expected: u64,
    pub received: u64,
    pub in_order: bool,
    #[serde(with = "optional_seconds")]
    pub first_item: Option<Duration>,
    #[serde(with = "optional_seconds")]
    pub last_item: Option<Duration>,
    #[serde(default, with = "optional_seconds")]
    pub max_gap: Option<Duration>,
    #[serde(default, with = "optional_seconds")]
    pub mean_gap: Option<Duration>,
    /// Failed items, which are not counted in `received`.
    #[serde(default)]
    pub errors: u64,
    /// Items received before the first failed one.
    #[serde(default)]
    pub received_before_error: Option<u64>,
}

impl StreamTrace {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            received: 0,
            in_order: true,
            first_item: None,
            last_item: None,
            max_gap: None,
            mean_gap: None,
            errors: 0,
            received_before_error: None,
        }
    }

    /// Record item `value` arriving `at` after the call started.
    pub fn record(&mut self, value: i64, at: Duration) {
        if let Some(last) = self.last_item {
            let gap = at.saturating_sub(last);
            self.max_gap = Some(self.max_gap.map_or(gap, |max| max.max(gap)));
        }
        if self.first_item.is_none() {
            self.first_item = Some(at);
        }
        if value != self.received as i64 {
            self.in_order = false;
        }
        self.received += 1;
        self.last_item = Some(at);

        if let (Some(first), true) = (self.first_item, self.received > 1) {
            let span = at.saturating_sub(first);
            let nanos = span.as_nanos() / u128::from(self.received - 1);
            self.mean_gap = Some(Duration::from_nanos(nanos as u64));
        }
    }

    /// Record a failed item.
    pub fn record_error(&mut self) {
        if self.received_before_error.is_none() {
            self.received_before_error = Some(self.received);
        }
        self.errors += 1;
    }

    /// Exactly the expected number of items, each in position.
    pub fn is_complete(&self) -> bool {
        self.in_order && self.received == self.expected
    }
}

/// Outcome counts, kept per record in result files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub success: u64,
    pub timeout: u64,
    pub transport_error: u64,
    pub protocol_mismatch: u64,
}

impl OutcomeTally {
    pub fn add(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::Timeout => self.timeout += 1,
            OutcomeKind::TransportError => self.transport_error += 1,
            OutcomeKind::ProtocolMismatch => self.protocol_mismatch += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeTally) {
        self.success += other.success;
        self.timeout += other.timeout;
        self.transport_error += other.transport_error;
        self.protocol_mismatch += other.protocol_mismatch;
    }

    pub fn failures(&self) -> u64 {
        self.timeout + self.transport_error + self.protocol_mismatch
    }
}

/// Everything one batch produced.
#[derive(Debug, Clone)]
pub struct RunSample {
    pub batch_size: usize,
    pub concurrency_limit: usize,
    pub outcomes: Vec<CallOutcome>,
    pub wall_time: Duration,
    pub stream: Option<StreamTrace>,
    pub peak_in_flight: usize,
}

impl RunSample {
    pub fn tally(&self) -> OutcomeTally {
        let mut tally = OutcomeTally::default();
        for outcome in &self.outcomes {
            tally.add(outcome.kind);
        }
        tally
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// A sample counts only if at least one call succeeded.
    pub fn is_valid(&self) -> bool {
        self.successes() > 0
    }

    pub fn require_success(&self, test: &str) -> Result<(), LoadError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(LoadError::NoSuccessfulCalls {
                test: test.to_string(),
                failures: self.outcomes.len(),
            })
        }
    }

    /// First failure message, for logs.
    pub fn first_error(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| o.error.as_deref())
    }
}

/// Wall-time statistics over measured rounds, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub stddev: f64,
    pub rounds: u64,
}

impl RoundStats {
    /// Sample standard deviation; zero for fewer than two rounds.
    pub fn from_durations(durations: &[Duration]) -> Self {
        let mut secs: Vec<f64> = durations.iter().map(Duration::as_secs_f64).collect();
        if secs.is_empty() {
            return Self {
                mean: 0.0,
                min: 0.0,
                max: 0.0,
                median: 0.0,
                stddev: 0.0,
                rounds: 0,
            };
        }

        secs.sort_by(f64::total_cmp);
        let len = secs.len();
        let mean = secs.iter().sum::<f64>() / len as f64;
        let median = if len % 2 == 0 {
            (secs[len / 2 - 1] + secs[len / 2]) / 2.0
        } else {
            secs[len / 2]
        };
        let stddev = if len > 1 {
            let variance = secs
                .iter()
                .map(|x| {
                    let diff = x - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (len - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Self {
            mean,
            min: secs[0],
            max: secs[len - 1],
            median,
            stddev,
            rounds: len as u64,
        }
    }
}

/// Format a duration in seconds in human-readable form (auto-selects ns/μs/ms/s).
pub fn format_seconds(secs: f64) -> String {
    if !secs.is_finite() {
        return "-".to_string();
    }
    let ns = secs * 1_000_000_000.0;
    if ns < 1_000.0 {
        format!("{:.0}ns", ns)
    } else if ns < 1_000_000.0 {
        format!("{:.2}μs", ns / 1_000.0)
    } else if ns < 1_000_000_000.0 {
        format!("{:.2}ms", ns / 1_000_000.0)
    } else {
        format!("{:.2}s", secs)
    }
}

/// System information captured at benchmark time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub kernel_version: Option<String>,
    pub cpu_model: String,
    pub cpu_cores: usize,
    /// Total system memory in bytes
    pub memory_bytes: u64,
    pub hostname: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let unknown = || "Unknown".to_string();
        Self {
            os: System::name().unwrap_or_else(unknown),
            os_version: System::os_version().unwrap_or_else(unknown),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(unknown),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(unknown),
        }
    }
}

/// One test's measurements for one implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub name: String,
    pub stats: RoundStats,
    /// Calls per measured batch. Per-operation figures divide by this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations_per_run: Option<u64>,
    #[serde(default)]
    pub outcomes: OutcomeTally,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BenchmarkRecord {
    pub fn new(name: impl Into<String>, stats: RoundStats) -> Self {
        Self {
            name: name.into(),
            stats,
            operations_per_run: None,
            outcomes: OutcomeTally::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_operations(mut self, operations: u64) -> Self {
        self.operations_per_run = Some(operations);
        self
    }

    pub fn with_outcomes(mut self, outcomes: OutcomeTally) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Values that fail to serialize are stored as `null`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Results of one implementation, written as `<implementation>_results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub implementation: String,
    pub kind: TransportKind,
    pub isolated: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub benchmarks: Vec<BenchmarkRecord>,
}

impl ResultFile {
    pub fn new(implementation: impl Into<String>, kind: TransportKind, isolated: bool) -> Self {
        Self {
            implementation: implementation.into(),
            kind,
            isolated,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system_info: SystemInfo::collect(),
            benchmarks: Vec::new(),
        }
    }

    pub fn add_record(&mut self, record: BenchmarkRecord) {
        self.benchmarks.push(record);
    }
}

mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_round_stats_from_durations() {
        let stats = RoundStats::from_durations(&ms(&[40, 10, 30, 20]));

        assert_eq!(stats.rounds, 4);
        assert!((stats.min - 0.010).abs() < 1e-9);
        assert!((stats.max - 0.040).abs() < 1e-9);
        assert!((stats.mean - 0.025).abs() < 1e-9);
        assert!((stats.median - 0.025).abs() < 1e-9);
        // sample stddev of 10,20,30,40 ms
        assert!((stats.stddev - 0.012_909_944).abs() < 1e-6);
    }

    #[test]
    fn test_round_stats_single_round() {
        let stats = RoundStats::from_durations(&ms(&[5]));
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.median, stats.mean);
    }

    #[test]
    fn test_round_stats_empty() {
        let stats = RoundStats::from_durations(&[]);
        assert_eq!(stats.rounds, 0);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.000_000_5), "500ns");
        assert_eq!(format_seconds(0.000_001_5), "1.50μs");
        assert_eq!(format_seconds(0.001_5), "1.50ms");
        assert_eq!(format_seconds(1.5), "1.50s");
        assert_eq!(format_seconds(f64::INFINITY), "-");
    }

    #[test]
    fn test_stream_trace_order() {
        let mut trace = StreamTrace::new(3);
        trace.record(0, Duration::from_millis(1));
        trace.record(2, Duration::from_millis(2));
        trace.record(1, Duration::from_millis(3));

        assert_eq!(trace.received, 3);
        assert!(!trace.in_order);
        assert!(!trace.is_complete());
        assert_eq!(trace.first_item, Some(Duration::from_millis(1)));
        assert_eq!(trace.last_item, Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_stream_trace_gaps_and_errors() {
        let mut trace = StreamTrace::new(4);
        assert_eq!(trace.mean_gap, None);

        trace.record(0, Duration::from_millis(10));
        trace.record(1, Duration::from_millis(12));
        trace.record_error();
        trace.record(2, Duration::from_millis(20));
        trace.record_error();
        trace.record(3, Duration::from_millis(22));

        assert_eq!(trace.max_gap, Some(Duration::from_millis(8)));
        assert_eq!(trace.mean_gap, Some(Duration::from_millis(4)));
        assert_eq!(trace.errors, 2);
        assert_eq!(trace.received_before_error, Some(2));
        assert!(trace.is_complete());

        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["errors"], 2);
        assert_eq!(json["max_gap"], 0.008);
    }

    #[test]
    fn test_sample_validity() {
        let sample = RunSample {
            batch_size: 2,
            concurrency_limit: 2,
            outcomes: vec![
                CallOutcome::failure(OutcomeKind::Timeout, Duration::ZERO, "slow"),
                CallOutcome::failure(OutcomeKind::TransportError, Duration::ZERO, "refused"),
            ],
            wall_time: Duration::from_millis(3),
            stream: None,
            peak_in_flight: 2,
        };

        assert!(!sample.is_valid());
        assert_eq!(sample.tally().failures(), 2);
        assert_eq!(sample.first_error(), Some("slow"));
        assert!(matches!(
            sample.require_success("simple_call"),
            Err(LoadError::NoSuccessfulCalls { failures: 2, .. })
        ));
    }

    #[test]
    fn test_system_info_collect() {
        let info = SystemInfo::collect();
        assert!(!info.os.is_empty());
        assert!(info.memory_bytes > 0);
    }

    #[test]
    fn test_record_serialization() {
        let record = BenchmarkRecord::new("simple_call", RoundStats::from_durations(&ms(&[10])))
            .with_operations(50)
            .with_metadata("concurrency_limit", 10);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "simple_call");
        assert_eq!(json["operations_per_run"], 50);
        assert_eq!(json["metadata"]["concurrency_limit"], 10);
        assert_eq!(json["outcomes"]["success"], 0);
    }
}
