// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `rpcbench serve` command - Run one backend in this process.
//!
//! Spawned by the lifecycle coordinator for isolated backends. Prints a
//! `READY` line on stdout once it accepts connections.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Context;

use rpcbench_core::server::{serve_isolated, Registration, ServeOptions};
use rpcbench_core::{Port, ServiceName, TransportKind};

pub async fn execute(
    kind: &str,
    port: u16,
    register: Option<String>,
    directory: Option<String>,
) -> anyhow::Result<ExitCode> {
    let kind = TransportKind::from_str(kind)?;
    let port = Port::new(port)?;

    let registration = match (register, directory) {
        (Some(name), Some(directory)) => Some(Registration {
            name: ServiceName::new(name)?,
            directory: SocketAddr::from_str(&directory)
                .with_context(|| format!("invalid directory address '{}'", directory))?,
        }),
        (Some(_), None) => anyhow::bail!("--register requires --directory"),
        (None, _) => None,
    };

    tracing::info!(kind = %kind, port = port.value(), "Starting backend");
    serve_isolated(ServeOptions {
        kind,
        port,
        registration,
    })
    .await?;

    Ok(ExitCode::SUCCESS)
}
