// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Entry point of a backend running in its own process.
//!
//! The parent waits for a line containing `READY` on stdout, so nothing else
//! may be printed there before the handshake.

use std::io::Write;
use std::net::SocketAddr;

use crate::directory::DirectoryClient;
use crate::error::{BenchError, BenchResult, LifecycleError};
use crate::types::{Port, ServiceName, TransportKind};

use super::{ServerHandle, LOOPBACK};

/// Readiness token expected by the lifecycle coordinator.
pub const READY_SIGNAL: &str = "READY";

/// Directory registration performed by an isolated server.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: ServiceName,
    pub directory: SocketAddr,
}

/// Options of the `serve` sub-command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub kind: TransportKind,
    pub port: Port,
    pub registration: Option<Registration>,
}

/// Run a reference server until SIGINT or SIGTERM.
pub async fn serve_isolated(options: ServeOptions) -> BenchResult<()> {
    let kind = options.kind;
    if !kind.supports_isolation() {
        return Err(LifecycleError::BackendStartup {
            kind,
            reason: "this kind has no server to isolate".to_string(),
            output: Vec::new(),
        }
        .into());
    }

    let addr = SocketAddr::from((LOOPBACK, options.port.value()));
    let server = ServerHandle::start(kind, addr).await?;
    let local_addr = server.local_addr();

    let registered = match &options.registration {
        Some(registration) => {
            let client = DirectoryClient::new(registration.directory);
            if let Err(e) = client.register(registration.name.clone(), local_addr).await {
                server.stop().await;
                return Err(e.into());
            }
            tracing::info!(
                name = %registration.name,
                directory = %registration.directory,
                "Registered with directory service"
            );
            Some((client, registration.name.clone()))
        }
        None => None,
    };

    announce_ready(kind, local_addr)?;
    tracing::info!(kind = %kind, addr = %local_addr, "Backend serving");

    wait_for_shutdown_signal().await?;
    tracing::info!(kind = %kind, "Shutdown signal received");

    if let Some((client, name)) = registered {
        if let Err(e) = client.remove(&name).await {
            tracing::warn!(name = %name, error = %e, "Failed to remove directory registration");
        }
    }
    server.stop().await;

    Ok(())
}

fn announce_ready(kind: TransportKind, addr: SocketAddr) -> BenchResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{} {} {}", READY_SIGNAL, kind, addr)
        .and_then(|_| stdout.flush())
        .map_err(|e| BenchError::Io {
            context: "announcing readiness",
            source: e,
        })
}

/// Resolve on the first SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() -> BenchResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).map_err(|e| BenchError::Io {
        context: "installing SIGTERM handler",
        source: e,
    })?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| BenchError::Io {
            context: "waiting for SIGINT",
            source: e,
        }),
        _ = terminate.recv() => Ok(()),
    }
}
