// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `rpcbench validate` command - Validate configuration file.

use std::path::Path;
use std::process::ExitCode;

use rpcbench_core::ConfigLoader;

pub fn execute(file: &Path) -> anyhow::Result<ExitCode> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let harness = &config.harness;
            println!("✓ Configuration is valid");
            println!();
            println!("Harness Settings:");
            println!(
                "  Rounds:             {} (+{} warmup)",
                harness.rounds, harness.warmup_rounds
            );
            println!(
                "  Simple Call:        {} calls, {} in flight",
                harness.total_calls, harness.concurrency_limit
            );
            println!("  Stream Count:       {}", harness.stream_count);
            println!("  Payload Sizes:      {:?}", harness.payload_sizes);
            println!(
                "  Sweep:              {:?} x {} calls",
                harness.sweep_levels, harness.sweep_total_calls
            );
            println!(
                "  Timeouts:           call {}ms, batch {}ms, implementation {}ms",
                harness.call_timeout.as_millis(),
                harness.batch_timeout.as_millis(),
                harness.implementation_timeout.as_millis()
            );
            println!("  Output Directory:   {}", config.output_dir.display());
            println!("  Directory Service:  {}", config.directory.address);
            println!();
            println!("Implementations ({}):", config.implementations.len());
            for implementation in &config.implementations {
                println!("  - {}", implementation.name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
