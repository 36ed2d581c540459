// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Load generation and round timing.
//!
//! [`LoadGenerator`] drives one batch of calls against a transport and
//! classifies every call. [`BenchmarkHarness`] repeats a batch for warmup and
//! measured rounds and turns the measured wall times into [`RoundStats`].

use std::future::Future;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};

use rpcbench_core::{LoadError, Payload, Transport, TransportError};

use crate::gate::AdmissionGate;
use crate::metrics::{
    CallOutcome, OutcomeKind, OutcomeTally, OutcomeValue, RoundStats, RunSample, StreamTrace,
};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Default deadline for a whole batch.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// The calls of one unary batch and how many may be in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryPlan {
    pub calls: Vec<Payload>,
    pub concurrency_limit: usize,
}

impl UnaryPlan {
    /// `total` identical calls.
    pub fn repeated(value: Payload, total: usize, concurrency_limit: usize) -> Self {
        Self {
            calls: vec![value; total],
            concurrency_limit,
        }
    }

    /// One text call per size, all allowed in flight together.
    pub fn large_payloads(sizes: &[usize]) -> Self {
        Self {
            calls: sizes.iter().map(|&len| Payload::text_of_len(len)).collect(),
            concurrency_limit: sizes.len().max(1),
        }
    }

    /// Concurrency sweep step: `total` integer calls at `level`.
    pub fn sweep(total: usize, level: usize) -> Self {
        Self::repeated(Payload::Int(42), total, level)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Issues calls and turns their results into [`CallOutcome`]s.
#[derive(Debug, Clone, Copy)]
pub struct LoadGenerator {
    call_timeout: Duration,
    batch_timeout: Duration,
}

impl Default for LoadGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT, DEFAULT_BATCH_TIMEOUT)
    }
}

impl LoadGenerator {
    pub fn new(call_timeout: Duration, batch_timeout: Duration) -> Self {
        Self {
            call_timeout,
            batch_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    /// Run every call of `plan`, at most `plan.concurrency_limit` at a time.
    ///
    /// Calls still pending at the batch deadline are cancelled and reported
    /// as timeouts, so the sample always has one outcome per planned call.
    pub async fn run_unary(&self, transport: &dyn Transport, plan: &UnaryPlan) -> RunSample {
        let gate = AdmissionGate::new(plan.concurrency_limit);
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.batch_timeout;

        let mut slots: Vec<Option<CallOutcome>> = (0..plan.len()).map(|_| None).collect();
        let mut pending: FuturesUnordered<_> = plan
            .calls
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let gate = &gate;
                async move {
                    let outcome = match gate.acquire().await {
                        Some(_permit) => self.call_once(transport, value.clone()).await,
                        None => CallOutcome::failure(
                            OutcomeKind::TransportError,
                            Duration::ZERO,
                            "admission gate closed",
                        ),
                    };
                    (index, outcome)
                }
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, outcome))) => slots[index] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        kind = %transport.kind(),
                        remaining = pending.len(),
                        batch_timeout_ms = self.batch_timeout.as_millis() as u64,
                        "Batch deadline reached, cancelling remaining calls"
                    );
                    break;
                }
            }
        }
        drop(pending);

        let wall_time = start.elapsed();
        let outcomes = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    CallOutcome::failure(
                        OutcomeKind::Timeout,
                        wall_time,
                        format!("cancelled at batch deadline of {}ms", self.batch_timeout.as_millis()),
                    )
                })
            })
            .collect();

        RunSample {
            batch_size: plan.len(),
            concurrency_limit: gate.limit(),
            outcomes,
            wall_time,
            stream: None,
            peak_in_flight: gate.peak(),
        }
    }

    async fn call_once(&self, transport: &dyn Transport, value: Payload) -> CallOutcome {
        let expected = value.doubled();
        let start = Instant::now();
        let result = tokio::time::timeout(self.call_timeout, transport.simple_call(value)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(reply)) if Some(&reply) == expected.as_ref() => {
                CallOutcome::success(elapsed, OutcomeValue::Payload(reply))
            }
            Ok(Ok(reply)) => CallOutcome::failure(
                OutcomeKind::ProtocolMismatch,
                elapsed,
                format!(
                    "expected {}, got {}",
                    expected.as_ref().map_or_else(|| "overflow".to_string(), Payload::describe),
                    reply.describe()
                ),
            ),
            Ok(Err(e)) => CallOutcome::failure(classify(&e), elapsed, e.to_string()),
            Err(_) => CallOutcome::failure(
                OutcomeKind::Timeout,
                elapsed,
                format!("call exceeded {}ms", self.call_timeout.as_millis()),
            ),
        }
    }

    /// Stream `count` values and drain them, checking order.
    ///
    /// Item errors are logged and draining continues until the stream ends,
    /// an item takes longer than the call timeout, or the batch deadline
    /// passes. The call succeeds only for exactly `count` in-order items.
    pub async fn run_stream(&self, transport: &dyn Transport, count: u64) -> RunSample {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.batch_timeout;
        let mut trace = StreamTrace::new(count);
        let mut errors: Vec<TransportError> = Vec::new();

        let drained = tokio::time::timeout_at(deadline, async {
            let opened = tokio::time::timeout(self.call_timeout, transport.stream_values(count)).await;
            let mut stream = match opened {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(TransportError::Timeout {
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    })
                }
            };

            loop {
                match tokio::time::timeout(self.call_timeout, stream.next()).await {
                    Ok(Some(Ok(value))) => trace.record(value, start.elapsed()),
                    Ok(Some(Err(e))) => {
                        tracing::warn!(
                            kind = %transport.kind(),
                            received = trace.received,
                            error = %e,
                            "Stream item failed, draining"
                        );
                        trace.record_error();
                        errors.push(e);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        errors.push(TransportError::Timeout {
                            timeout_ms: self.call_timeout.as_millis() as u64,
                        });
                        break;
                    }
                }
            }
            Ok(())
        })
        .await;

        let elapsed = start.elapsed();
        let outcome = match drained {
            Err(_) => CallOutcome::failure(
                OutcomeKind::Timeout,
                elapsed,
                format!(
                    "stream exceeded batch deadline of {}ms after {} item(s)",
                    self.batch_timeout.as_millis(),
                    trace.received
                ),
            ),
            Ok(Err(e)) => CallOutcome::failure(classify(&e), elapsed, e.to_string()),
            Ok(Ok(())) if trace.is_complete() && errors.is_empty() => {
                CallOutcome::success(elapsed, OutcomeValue::Items(trace.received))
            }
            Ok(Ok(())) => match errors.first() {
                Some(e) => CallOutcome::failure(classify(e), elapsed, e.to_string()),
                None => CallOutcome::failure(
                    OutcomeKind::ProtocolMismatch,
                    elapsed,
                    format!(
                        "expected {} in-order item(s), received {} (in order: {})",
                        count, trace.received, trace.in_order
                    ),
                ),
            },
        };

        RunSample {
            batch_size: 1,
            concurrency_limit: 1,
            outcomes: vec![outcome],
            wall_time: elapsed,
            stream: Some(trace),
            peak_in_flight: 1,
        }
    }
}

/// Map a transport error onto an outcome kind.
pub fn classify(error: &TransportError) -> OutcomeKind {
    match error {
        TransportError::Timeout { .. } => OutcomeKind::Timeout,
        TransportError::Protocol { .. } => OutcomeKind::ProtocolMismatch,
        _ => OutcomeKind::TransportError,
    }
}

/// Measured rounds of one test.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub stats: RoundStats,
    pub outcomes: OutcomeTally,
    pub peak_in_flight: usize,
    /// Stream trace of the last measured round, for stream tests.
    pub stream: Option<StreamTrace>,
}

/// Runs a batch for warmup and measured rounds.
pub struct BenchmarkHarness {
    warmup_rounds: u32,
    rounds: u32,
}

impl BenchmarkHarness {
    /// Create a new harness with default settings.
    pub fn new() -> Self {
        Self {
            warmup_rounds: 1,
            rounds: 5,
        }
    }

    /// Set the number of warmup rounds.
    pub fn warmup(mut self, rounds: u32) -> Self {
        self.warmup_rounds = rounds;
        self
    }

    /// Set the number of measured rounds. At least one round always runs.
    pub fn rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Run `round` for warmup, then for each measured round.
    ///
    /// Every measured sample must contain a success; the first that does not
    /// fails the test. Warmup samples are only logged.
    pub async fn run<F, Fut>(&self, test: &str, mut round: F) -> Result<Measurement, LoadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RunSample>,
    {
        for i in 0..self.warmup_rounds {
            let sample = round().await;
            if !sample.is_valid() {
                tracing::warn!(
                    test,
                    round = i,
                    error = sample.first_error().unwrap_or("unknown"),
                    "Warmup round produced no successful calls"
                );
            }
        }

        let mut wall_times = Vec::with_capacity(self.rounds as usize);
        let mut outcomes = OutcomeTally::default();
        let mut peak_in_flight = 0;
        let mut stream = None;

        for i in 0..self.rounds {
            let sample = round().await;
            let tally = sample.tally();
            outcomes.merge(&tally);

            if let Err(e) = sample.require_success(test) {
                tracing::warn!(
                    test,
                    round = i,
                    error = sample.first_error().unwrap_or("unknown"),
                    "Measured round produced no successful calls"
                );
                return Err(e);
            }
            if tally.failures() > 0 {
                tracing::debug!(
                    test,
                    round = i,
                    failures = tally.failures(),
                    "Round had failed calls"
                );
            }

            wall_times.push(sample.wall_time);
            peak_in_flight = peak_in_flight.max(sample.peak_in_flight);
            stream = sample.stream;
        }

        Ok(Measurement {
            stats: RoundStats::from_durations(&wall_times),
            outcomes,
            peak_in_flight,
            stream,
        })
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}
