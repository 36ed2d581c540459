// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod aggregate;
pub mod directory;
pub mod run;
pub mod serve;
pub mod validate;
