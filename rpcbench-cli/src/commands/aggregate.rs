// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `rpcbench aggregate` command - Compare the results of a run directory.

use std::path::Path;
use std::process::ExitCode;

use rpcbench_benchmark::reporter::{format_summary, resolve_results_dir};
use rpcbench_benchmark::{Aggregator, JsonReporter};

pub fn execute(results_dir: &Path, output: &str) -> anyhow::Result<ExitCode> {
    let results_dir = resolve_results_dir(results_dir);
    if !results_dir.is_dir() {
        eprintln!("✗ Results directory {} does not exist", results_dir.display());
        return Ok(ExitCode::FAILURE);
    }

    let results = match Aggregator::new(&results_dir).require_data() {
        Ok(results) => results,
        Err(e) => {
            eprintln!("✗ {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let output_path = results_dir.join(output);
    JsonReporter::save_processed(&output_path, &results)?;

    print!("{}", format_summary(&results));
    println!();
    println!("Processed results saved to {}", output_path.display());
    Ok(ExitCode::SUCCESS)
}
