// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `rpcbench run` command - Benchmark and compare implementations.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use rpcbench_benchmark::reporter::format_summary;
use rpcbench_benchmark::Orchestrator;
use rpcbench_core::{Config, ConfigLoader, TransportKind};

pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub implementations: Vec<String>,
    pub isolated: bool,
    pub test: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub rounds: Option<u32>,
}

/// Configuration file plus command-line overrides.
fn build_config(options: &RunOptions) -> anyhow::Result<Config> {
    let mut config = match &options.config {
        Some(path) => ConfigLoader::load_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if !options.implementations.is_empty() {
        let kinds = options
            .implementations
            .iter()
            .map(|name| TransportKind::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        config = config.with_implementations(&kinds, options.isolated)?;
    } else if options.isolated {
        let kinds: Vec<TransportKind> = config.implementations.iter().map(|i| i.kind).collect();
        config = config.with_implementations(&kinds, true)?;
    }

    if let Some(dir) = &options.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(secs) = options.timeout {
        anyhow::ensure!(secs > 0, "--timeout must be positive");
        config.harness.implementation_timeout = Duration::from_secs(secs);
    }
    if let Some(rounds) = options.rounds {
        anyhow::ensure!(rounds > 0, "--rounds must be positive");
        config.harness.rounds = rounds;
    }
    Ok(config)
}

pub async fn execute(options: RunOptions) -> anyhow::Result<ExitCode> {
    let config = build_config(&options)?;

    tracing::info!(
        implementations = ?config.implementations.iter().map(|i| i.name()).collect::<Vec<_>>(),
        output_dir = %config.output_dir.display(),
        "Starting benchmarks"
    );

    let report = Orchestrator::new(config)
        .with_test_filter(options.test.clone())
        .run()
        .await?;

    println!();
    print!("{}", format_summary(&report.processed));
    println!();
    println!("Results: {}", report.run_dir.display());
    if let Some(path) = &report.processed_path {
        println!("Processed: {}", path.display());
    }

    if report.is_success() {
        println!("✓ All implementations completed");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("✗ {} failure(s):", report.failures.len());
        for failure in &report.failures {
            eprintln!(
                "  - {} [{}]: {}",
                failure.implementation, failure.phase, failure.error
            );
        }
        Ok(ExitCode::FAILURE)
    }
}
