// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! rpcbench CLI
//!
//! Command-line interface for the rpcbench transport benchmarking harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// rpcbench - Comparative benchmarks for RPC transports
#[derive(Parser)]
#[command(name = "rpcbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Benchmark the configured implementations and compare them
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Transport kinds to benchmark (overrides the configuration)
        #[arg(short, long, value_delimiter = ',')]
        implementations: Vec<String>,

        /// Run each backend in its own process
        #[arg(long)]
        isolated: bool,

        /// Only run tests whose name contains this pattern
        #[arg(short, long)]
        test: Option<String>,

        /// Directory for result files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Per-implementation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Measured rounds per test
        #[arg(long)]
        rounds: Option<u32>,
    },

    /// Serve one backend until SIGINT/SIGTERM (used for isolated backends)
    Serve {
        /// Transport kind to serve
        #[arg(short, long)]
        kind: String,

        /// Loopback port to listen on
        #[arg(short, long)]
        port: u16,

        /// Register under this name in the directory service
        #[arg(long, requires = "directory")]
        register: Option<String>,

        /// Directory service address
        #[arg(long)]
        directory: Option<String>,
    },

    /// Run the directory service until SIGINT/SIGTERM
    Directory {
        /// Loopback port to listen on (0 picks a free port)
        #[arg(short, long, default_value_t = 9090)]
        port: u16,
    },

    /// Aggregate the result files of a run directory
    Aggregate {
        /// Run directory, or the `latest` link
        #[arg(short, long)]
        results_dir: PathBuf,

        /// Output file name inside the run directory
        #[arg(short, long, default_value = "processed_results.json")]
        output: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the READY handshake of backend processes.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Dispatch to command handlers
    runtime.block_on(async {
        match cli.command {
            Commands::Run {
                config,
                implementations,
                isolated,
                test,
                output_dir,
                timeout,
                rounds,
            } => {
                let options = commands::run::RunOptions {
                    config,
                    implementations,
                    isolated,
                    test,
                    output_dir,
                    timeout,
                    rounds,
                };
                commands::run::execute(options).await
            }
            Commands::Serve {
                kind,
                port,
                register,
                directory,
            } => commands::serve::execute(&kind, port, register, directory).await,
            Commands::Directory { port } => commands::directory::execute(port).await,
            Commands::Aggregate {
                results_dir,
                output,
            } => commands::aggregate::execute(&results_dir, &output),
            Commands::Validate { file } => commands::validate::execute(&file),
        }
    })
}
