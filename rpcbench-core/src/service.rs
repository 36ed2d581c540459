// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The benchmark service every backend exposes.

use thiserror::Error;

use crate::types::Payload;

/// Errors raised by the service itself, reported to clients as remote errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Cannot double {value}: integer overflow")]
    Overflow { value: i64 },
}

/// Stateless implementation of the two benchmark operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchService;

impl BenchService {
    /// `value * 2` for integers, `value + value` for text.
    pub fn simple_call(&self, value: &Payload) -> Result<Payload, ServiceError> {
        match value {
            Payload::Int(v) => v
                .checked_mul(2)
                .map(Payload::Int)
                .ok_or(ServiceError::Overflow { value: *v }),
            Payload::Text(s) => Ok(Payload::Text(s.repeat(2))),
        }
    }

    /// The values `0..count`, in order.
    pub fn stream_values(&self, count: u64) -> impl Iterator<Item = i64> + Send + 'static {
        (0..count).map(|v| v as i64)
    }
}
