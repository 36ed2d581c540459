// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! rpcbench Benchmarking Framework
//!
//! Drives calibrated concurrent load against the transports provided by
//! `rpcbench-core` and compares implementations.
//!
//! # Pipeline
//!
//! - **Load generation**: batches of unary or streaming calls behind an
//!   admission gate, every call classified as a [`metrics::CallOutcome`]
//! - **Rounds**: warmup and measured rounds summarized as [`RoundStats`]
//! - **Persistence**: one `<implementation>_results.json` per implementation
//!   in a timestamped run directory
//! - **Aggregation**: per-operation normalization, ranking and summary in
//!   `processed_results.json`

pub mod aggregate;
pub mod gate;
pub mod harness;
pub mod metrics;
pub mod orchestrator;
pub mod reporter;
pub mod suite;

pub use aggregate::{Aggregator, ComparisonEntry, ProcessedResults, Summary, Winner};
pub use gate::AdmissionGate;
pub use harness::{BenchmarkHarness, LoadGenerator, UnaryPlan};
pub use metrics::{BenchmarkRecord, ResultFile, RoundStats, RunSample, SystemInfo};
pub use orchestrator::{ImplementationFailure, Orchestrator, Phase, RunReport};
pub use reporter::JsonReporter;
pub use suite::BenchmarkSuite;
