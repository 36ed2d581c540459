// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Port allocation for isolated backends.

use std::net::{SocketAddr, TcpListener};

use crate::error::LifecycleError;
use crate::server::LOOPBACK;
use crate::types::{Port, TransportKind};

/// Ask the OS for a free loopback port.
///
/// The probe socket is closed before returning, so another process could in
/// principle take the port before the backend binds it.
pub fn allocate_port(kind: TransportKind) -> Result<Port, LifecycleError> {
    let startup = |reason: String| LifecycleError::BackendStartup {
        kind,
        reason,
        output: Vec::new(),
    };

    let listener = TcpListener::bind(SocketAddr::from((LOOPBACK, 0)))
        .map_err(|e| startup(format!("port allocation failed: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| startup(format!("port allocation failed: {}", e)))?
        .port();
    drop(listener);

    Port::new(port).map_err(|e| startup(e.to_string()))
}
