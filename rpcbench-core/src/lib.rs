// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! rpcbench Core Library
//!
//! Core library for the rpcbench multi-transport benchmarking harness.
//! Provides the shared data model, configuration parsing, the reference
//! backends and their transport adapters, the directory service, and the
//! backend lifecycle coordinator.

pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod service;
pub mod transport;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use config::{
    Config, ConfigLoader, DirectoryConfig, HarnessConfig, ImplementationConfig, LifecycleConfig,
};
pub use directory::{DirectoryClient, DirectoryServer, RetryPolicy};
pub use error::{
    AggregationError, BenchError, BenchResult, HardValidationError, LifecycleError, LoadError,
    StateTransitionError, TransportError,
};
pub use lifecycle::{BackendTarget, LifecycleCoordinator, LifecycleSettings, TransportHandle};
pub use service::BenchService;
pub use transport::{Transport, ValueStream};
pub use types::{Payload, Port, ServiceName, Sharing, TransportKind};
