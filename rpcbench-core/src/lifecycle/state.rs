// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend state machine with typed state transitions.
//!
//! Implements the backend lifecycle: Spawning → AwaitingReady → Ready →
//! Terminating → Terminated. Any live state may fail; a failed backend is
//! still terminated. Invalid transitions result in StateTransitionError.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Backend lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendState {
    /// Resources are being acquired.
    Spawning,

    /// Waiting for the backend to announce readiness.
    AwaitingReady,

    /// Backend accepts calls.
    Ready,

    /// Resources are being released.
    Terminating,

    /// Every resource has been released.
    Terminated,

    /// Setup failed; resources still need releasing.
    Failed,
}

impl BackendState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Spawning => "Spawning",
            Self::AwaitingReady => "AwaitingReady",
            Self::Ready => "Ready",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: BackendState) -> bool {
        matches!(
            (self, target),
            (Self::Spawning, Self::AwaitingReady) |
            (Self::AwaitingReady, Self::Ready) |
            (Self::Ready, Self::Terminating) |
            (Self::Terminating, Self::Terminated) |
            // Failure from any live state
            (Self::Spawning, Self::Failed) |
            (Self::AwaitingReady, Self::Failed) |
            (Self::Ready, Self::Failed) |
            (Self::Failed, Self::Terminating)
        )
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one backend.
#[derive(Debug)]
pub struct BackendStateMachine {
    backend: String,
    current_state: BackendState,
    last_transition: Instant,
    transition_count: u64,
}

impl BackendStateMachine {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            current_state: BackendState::Spawning,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    pub fn state(&self) -> BackendState {
        self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.last_transition.elapsed()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: BackendState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                backend: self.backend.clone(),
                state: self.current_state.name(),
            });
        }

        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                backend: self.backend.clone(),
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            backend = %self.backend,
            from = self.current_state.name(),
            to = target.name(),
            elapsed_ms = self.last_transition.elapsed().as_millis() as u64,
            "State transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    /// Whether calls may be issued against the backend.
    pub fn is_ready(&self) -> bool {
        self.current_state == BackendState::Ready
    }
}
