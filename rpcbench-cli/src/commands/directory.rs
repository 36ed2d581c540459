// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `rpcbench directory` command - Run the directory service.

use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;

use rpcbench_core::server::{wait_for_shutdown_signal, LOOPBACK, READY_SIGNAL};
use rpcbench_core::DirectoryServer;

pub async fn execute(port: u16) -> anyhow::Result<ExitCode> {
    let mut server = DirectoryServer::bind(SocketAddr::from((LOOPBACK, port))).await?;
    let addr = server.local_addr();

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{} directory {}", READY_SIGNAL, addr)?;
        stdout.flush()?;
    }
    tracing::info!(addr = %addr, "Directory service running");

    wait_for_shutdown_signal().await?;

    tracing::info!(registrations = server.len(), "Stopping directory service");
    server.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
