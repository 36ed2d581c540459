// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for rpcbench.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`
//! in library code - every failure a benchmark run can hit is a named variant.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TransportKind;

/// Top-level error type for the benchmarking harness.
#[derive(Debug, Error)]
pub enum BenchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Backend Lifecycle Errors
    // =========================================================================
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    // =========================================================================
    // Call-Level Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    // =========================================================================
    // Result Processing Errors
    // =========================================================================
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {context} - {source}")]
    Serialization {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Hard validation errors abort before any backend is started.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Unknown transport kind: {value}")]
    UnknownTransportKind { value: String },

    #[error("Duplicate implementation: {name}")]
    DuplicateImplementation { name: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Backend state machine violations.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for backend {backend}")]
    InvalidTransition {
        backend: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Backend {backend} is in terminal state: {state}")]
    TerminalState {
        backend: String,
        state: &'static str,
    },
}

/// Setup/teardown failures of a backend.
///
/// Raised only after every resource acquired during the failed phase has been
/// released.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Backend {kind} failed to start: {reason}")]
    BackendStartup {
        kind: TransportKind,
        reason: String,
        /// Lines captured from the backend process before it failed.
        output: Vec<String>,
    },

    #[error("Backend discovery for '{name}' failed after {attempts} attempt(s): {reason}")]
    BackendDiscovery {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("Backend {phase} exceeded {timeout_ms}ms")]
    BackendTimeout {
        phase: &'static str,
        timeout_ms: u64,
    },

    #[error("Invalid backend state: {0}")]
    InvalidState(#[from] StateTransitionError),
}

impl LifecycleError {
    /// Captured process output, if the failure carried any.
    pub fn captured_output(&self) -> &[String] {
        match self {
            Self::BackendStartup { output, .. } => output,
            _ => &[],
        }
    }
}

/// Failures of a single call against a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("IO failure: {reason}")]
    Io { reason: String },

    #[error("Protocol mismatch: {reason}")]
    Protocol { reason: String },

    #[error("Remote error: {message}")]
    Remote { message: String },

    #[error("Connection closed")]
    Closed,

    #[error("Call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport is not set up")]
    NotReady,
}

impl TransportError {
    pub(crate) fn io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout {
                timeout_ms: 0,
            },
            _ => Self::Io {
                reason: err.to_string(),
            },
        }
    }
}

/// Load generation failures that invalidate a whole test.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Test '{test}' produced no successful calls ({failures} failure(s))")]
    NoSuccessfulCalls { test: String, failures: usize },

    #[error("Test '{test}' exceeded its deadline of {timeout_ms}ms")]
    Deadline { test: String, timeout_ms: u64 },
}

/// Result aggregation failures.
///
/// Per-file problems are downgraded to warnings by the aggregator; these
/// variants surface only when a caller requires data.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("No valid benchmark data found in {path}")]
    NoData { path: PathBuf },

    #[error("Malformed result file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "kind",
            context: "implementation at index 2".to_string(),
        };
        assert!(err.to_string().contains("kind"));
        assert!(err.to_string().contains("index 2"));
    }

    #[test]
    fn test_error_chain() {
        let lifecycle = LifecycleError::BackendTimeout {
            phase: "setup",
            timeout_ms: 30_000,
        };
        let err: BenchError = lifecycle.into();
        assert!(matches!(err, BenchError::Lifecycle(_)));
        assert!(err.to_string().contains("setup"));
    }

    #[test]
    fn test_startup_error_keeps_output() {
        let err = LifecycleError::BackendStartup {
            kind: TransportKind::Threaded,
            reason: "no READY".to_string(),
            output: vec!["listening?".to_string()],
        };
        assert_eq!(err.captured_output(), ["listening?".to_string()]);

        let other = LifecycleError::BackendDiscovery {
            name: "svc".to_string(),
            attempts: 5,
            reason: "not registered".to_string(),
        };
        assert!(other.captured_output().is_empty());
    }

    #[test]
    fn test_io_error_classification() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(TransportError::io(eof), TransportError::Closed);

        let timed_out = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert!(matches!(
            TransportError::io(timed_out),
            TransportError::Timeout { .. }
        ));
    }
}
