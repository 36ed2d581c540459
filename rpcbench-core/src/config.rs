// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Any invalid field results in a HardValidationError before a backend is
//! started.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::types::TransportKind;

/// Largest payload the large-payload test may send. The doubled response
/// must stay under the frame limit.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Raw harness parameters as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawHarnessConfig {
    rounds: u32,
    warmup_rounds: u32,
    total_calls: usize,
    concurrency_limit: usize,
    stream_count: u64,
    payload_sizes: Vec<usize>,
    sweep_levels: Vec<usize>,
    sweep_total_calls: usize,
    call_timeout_ms: u64,
    batch_timeout_ms: u64,
    implementation_timeout_ms: u64,
}

impl Default for RawHarnessConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            warmup_rounds: 1,
            total_calls: 50,
            concurrency_limit: 10,
            stream_count: 1000,
            payload_sizes: vec![1024, 10 * 1024, 100 * 1024, 1024 * 1024],
            sweep_levels: vec![1, 5, 10, 20, 50, 100],
            sweep_total_calls: 200,
            call_timeout_ms: 15_000,
            batch_timeout_ms: 120_000,
            implementation_timeout_ms: 600_000,
        }
    }
}

/// Raw backend lifecycle parameters.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLifecycleConfig {
    ready_timeout_ms: u64,
    setup_timeout_ms: u64,
    shutdown_grace_ms: u64,
    server_program: Option<String>,
}

impl Default for RawLifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10_000,
            setup_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
            server_program: None,
        }
    }
}

/// Raw directory service parameters.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDirectoryConfig {
    address: String,
    lookup_attempts: u32,
    lookup_backoff_ms: u64,
}

impl Default for RawDirectoryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9090".to_string(),
            lookup_attempts: 5,
            lookup_backoff_ms: 2_000,
        }
    }
}

/// Raw implementation entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawImplementationConfig {
    kind: Option<String>,
    #[serde(default)]
    isolated: bool,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    harness: RawHarnessConfig,
    lifecycle: RawLifecycleConfig,
    directory: RawDirectoryConfig,
    implementations: Vec<RawImplementationConfig>,
    output_dir: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            harness: RawHarnessConfig::default(),
            lifecycle: RawLifecycleConfig::default(),
            directory: RawDirectoryConfig::default(),
            implementations: ImplementationConfig::defaults()
                .into_iter()
                .map(|imp| RawImplementationConfig {
                    kind: Some(imp.kind.name().to_string()),
                    isolated: imp.isolated,
                })
                .collect(),
            output_dir: "benchmark_results".to_string(),
        }
    }
}

/// Validated load and statistics parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub rounds: u32,
    pub warmup_rounds: u32,
    pub total_calls: usize,
    pub concurrency_limit: usize,
    pub stream_count: u64,
    pub payload_sizes: Vec<usize>,
    pub sweep_levels: Vec<usize>,
    pub sweep_total_calls: usize,
    pub call_timeout: Duration,
    pub batch_timeout: Duration,
    pub implementation_timeout: Duration,
}

/// Validated backend lifecycle parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub ready_timeout: Duration,
    pub setup_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Executable providing the `serve` sub-command for isolated backends.
    /// `None` means the currently running executable.
    pub server_program: Option<PathBuf>,
}

/// Validated directory service parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryConfig {
    pub address: SocketAddr,
    pub lookup_attempts: u32,
    pub lookup_backoff: Duration,
}

/// One implementation to benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplementationConfig {
    pub kind: TransportKind,
    pub isolated: bool,
}

impl ImplementationConfig {
    /// Build an entry; isolation is dropped for kinds that cannot be isolated.
    pub fn new(kind: TransportKind, isolated: bool) -> Self {
        Self {
            kind,
            isolated: isolated && kind.supports_isolation(),
        }
    }

    /// Name used for result files and comparisons.
    pub fn name(&self) -> String {
        if self.isolated {
            format!("{}-isolated", self.kind)
        } else {
            self.kind.to_string()
        }
    }

    /// Implementations benchmarked when none are configured. The directory
    /// kind needs an externally started directory service, so it is opt-in.
    pub fn defaults() -> Vec<Self> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| *kind != TransportKind::Directory)
            .map(|kind| Self::new(kind, false))
            .collect()
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub harness: HarnessConfig,
    pub lifecycle: LifecycleConfig,
    pub directory: DirectoryConfig,
    pub implementations: Vec<ImplementationConfig>,
    pub output_dir: PathBuf,
}

impl Config {
    /// Replace the configured implementations, e.g. from command-line flags.
    pub fn with_implementations(
        mut self,
        kinds: &[TransportKind],
        isolated: bool,
    ) -> BenchResult<Self> {
        let implementations = kinds
            .iter()
            .map(|kind| ImplementationConfig::new(*kind, isolated))
            .collect();
        self.implementations = ConfigLoader::check_implementations(implementations)?;
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        // Built-in defaults always validate; the literal below mirrors them.
        ConfigLoader::validate(RawConfig::default()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Built-in defaults failed validation");
            Config {
                harness: HarnessConfig {
                    rounds: 5,
                    warmup_rounds: 1,
                    total_calls: 50,
                    concurrency_limit: 10,
                    stream_count: 1000,
                    payload_sizes: Vec::new(),
                    sweep_levels: Vec::new(),
                    sweep_total_calls: 200,
                    call_timeout: Duration::from_secs(15),
                    batch_timeout: Duration::from_secs(120),
                    implementation_timeout: Duration::from_secs(600),
                },
                lifecycle: LifecycleConfig {
                    ready_timeout: Duration::from_secs(10),
                    setup_timeout: Duration::from_secs(30),
                    shutdown_grace: Duration::from_secs(5),
                    server_program: None,
                },
                directory: DirectoryConfig {
                    address: SocketAddr::from(([127, 0, 0, 1], 9090)),
                    lookup_attempts: 5,
                    lookup_backoff: Duration::from_secs(2),
                },
                implementations: ImplementationConfig::defaults(),
                output_dir: PathBuf::from("benchmark_results"),
            }
        })
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> BenchResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BenchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> BenchResult<Config> {
        // An empty document deserializes to unit, not to an empty mapping.
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| BenchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?
        };

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> BenchResult<Config> {
        let harness = Self::validate_harness(raw.harness)?;
        let lifecycle = Self::validate_lifecycle(raw.lifecycle)?;
        let directory = Self::validate_directory(raw.directory)?;

        let mut implementations = Vec::with_capacity(raw.implementations.len());
        for (index, raw_impl) in raw.implementations.into_iter().enumerate() {
            let kind = raw_impl
                .kind
                .ok_or_else(|| HardValidationError::MissingRequiredField {
                    field: "kind",
                    context: format!("implementation at index {}", index),
                })?
                .parse::<TransportKind>()?;
            implementations.push(ImplementationConfig::new(kind, raw_impl.isolated));
        }
        let implementations = Self::check_implementations(implementations)?;

        if raw.output_dir.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "output_dir",
                value: raw.output_dir,
                reason: "Output directory cannot be empty".to_string(),
            }
            .into());
        }

        Ok(Config {
            harness,
            lifecycle,
            directory,
            implementations,
            output_dir: PathBuf::from(raw.output_dir),
        })
    }

    fn check_implementations(
        implementations: Vec<ImplementationConfig>,
    ) -> BenchResult<Vec<ImplementationConfig>> {
        if implementations.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one implementation must be configured".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for imp in &implementations {
            if !seen.insert(imp.name()) {
                return Err(HardValidationError::DuplicateImplementation { name: imp.name() }.into());
            }
        }

        Ok(implementations)
    }

    fn validate_harness(raw: RawHarnessConfig) -> BenchResult<HarnessConfig> {
        if raw.rounds == 0 || raw.rounds > 1000 {
            return Err(invalid("rounds", raw.rounds, "Must be between 1 and 1000"));
        }

        if raw.warmup_rounds > 100 {
            return Err(invalid("warmup_rounds", raw.warmup_rounds, "Must not exceed 100"));
        }

        if raw.total_calls == 0 {
            return Err(invalid("total_calls", raw.total_calls, "Must be greater than 0"));
        }

        if raw.concurrency_limit == 0 || raw.concurrency_limit > 10_000 {
            return Err(invalid(
                "concurrency_limit",
                raw.concurrency_limit,
                "Must be between 1 and 10000",
            ));
        }

        if let Some(size) = raw.payload_sizes.iter().find(|s| **s > MAX_PAYLOAD_SIZE) {
            return Err(invalid(
                "payload_sizes",
                size,
                &format!("Payload sizes must not exceed {} bytes", MAX_PAYLOAD_SIZE),
            ));
        }

        if let Some(level) = raw
            .sweep_levels
            .iter()
            .find(|l| **l == 0 || **l > 10_000)
        {
            return Err(invalid(
                "sweep_levels",
                level,
                "Concurrency levels must be between 1 and 10000",
            ));
        }

        if !raw.sweep_levels.is_empty() && raw.sweep_total_calls == 0 {
            return Err(invalid(
                "sweep_total_calls",
                raw.sweep_total_calls,
                "Must be greater than 0 when sweep levels are configured",
            ));
        }

        for (field, value) in [
            ("call_timeout_ms", raw.call_timeout_ms),
            ("batch_timeout_ms", raw.batch_timeout_ms),
            ("implementation_timeout_ms", raw.implementation_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, value, "Timeout must be greater than 0"));
            }
        }

        if raw.call_timeout_ms > raw.batch_timeout_ms {
            return Err(invalid(
                "call_timeout_ms",
                raw.call_timeout_ms,
                "Call timeout must not exceed the batch timeout",
            ));
        }

        Ok(HarnessConfig {
            rounds: raw.rounds,
            warmup_rounds: raw.warmup_rounds,
            total_calls: raw.total_calls,
            concurrency_limit: raw.concurrency_limit,
            stream_count: raw.stream_count,
            payload_sizes: raw.payload_sizes,
            sweep_levels: raw.sweep_levels,
            sweep_total_calls: raw.sweep_total_calls,
            call_timeout: Duration::from_millis(raw.call_timeout_ms),
            batch_timeout: Duration::from_millis(raw.batch_timeout_ms),
            implementation_timeout: Duration::from_millis(raw.implementation_timeout_ms),
        })
    }

    fn validate_lifecycle(raw: RawLifecycleConfig) -> BenchResult<LifecycleConfig> {
        // READY handshakes faster than 1s are unrealistic, slower than 5 min are hangs
        if !(1_000..=300_000).contains(&raw.ready_timeout_ms) {
            return Err(invalid(
                "ready_timeout_ms",
                raw.ready_timeout_ms,
                "Must be between 1000 and 300000",
            ));
        }

        if raw.setup_timeout_ms < raw.ready_timeout_ms {
            return Err(invalid(
                "setup_timeout_ms",
                raw.setup_timeout_ms,
                "Setup timeout must be at least the ready timeout",
            ));
        }

        if raw.shutdown_grace_ms == 0 {
            return Err(invalid(
                "shutdown_grace_ms",
                raw.shutdown_grace_ms,
                "Grace period must be greater than 0",
            ));
        }

        let server_program = match raw.server_program {
            Some(p) if p.trim().is_empty() => {
                return Err(invalid("server_program", "\"\"", "Program path cannot be empty"));
            }
            Some(p) => Some(PathBuf::from(p)),
            None => None,
        };

        Ok(LifecycleConfig {
            ready_timeout: Duration::from_millis(raw.ready_timeout_ms),
            setup_timeout: Duration::from_millis(raw.setup_timeout_ms),
            shutdown_grace: Duration::from_millis(raw.shutdown_grace_ms),
            server_program,
        })
    }

    fn validate_directory(raw: RawDirectoryConfig) -> BenchResult<DirectoryConfig> {
        let address: SocketAddr =
            raw.address
                .parse()
                .map_err(|e| HardValidationError::InvalidFieldValue {
                    field: "directory.address",
                    value: raw.address.clone(),
                    reason: format!("Not a socket address: {}", e),
                })?;

        if address.port() == 0 {
            return Err(HardValidationError::InvalidPort {
                port: 0,
                reason: "Directory service needs a fixed port".to_string(),
            }
            .into());
        }

        if raw.lookup_attempts == 0 || raw.lookup_attempts > 100 {
            return Err(invalid(
                "lookup_attempts",
                raw.lookup_attempts,
                "Must be between 1 and 100",
            ));
        }

        Ok(DirectoryConfig {
            address,
            lookup_attempts: raw.lookup_attempts,
            lookup_backoff: Duration::from_millis(raw.lookup_backoff_ms),
        })
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &str) -> BenchError {
    HardValidationError::InvalidFieldValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
harness:
  rounds: 3
  total_calls: 20
  concurrency_limit: 4
  payload_sizes: [16, 32]
  sweep_levels: [1, 2]
  call_timeout_ms: 5000

lifecycle:
  ready_timeout_ms: 20000
  setup_timeout_ms: 30000

directory:
  address: 127.0.0.1:9191
  lookup_attempts: 2

implementations:
  - kind: in-process
  - kind: message-queue
    isolated: true

output_dir: /tmp/rpcbench-results
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.harness.rounds, 3);
        assert_eq!(config.harness.concurrency_limit, 4);
        assert_eq!(config.harness.call_timeout, Duration::from_secs(5));
        assert_eq!(config.lifecycle.ready_timeout, Duration::from_secs(20));
        assert_eq!(config.directory.address.port(), 9191);
        assert_eq!(config.implementations.len(), 2);
        assert_eq!(config.implementations[1].name(), "message-queue-isolated");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/rpcbench-results"));
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config.harness.total_calls, 50);
        assert_eq!(config.harness.concurrency_limit, 10);
        assert_eq!(config.harness.stream_count, 1000);
        assert_eq!(config.harness.payload_sizes, vec![1024, 10240, 102400, 1048576]);
        assert_eq!(config.harness.sweep_levels, vec![1, 5, 10, 20, 50, 100]);
        assert_eq!(config.harness.sweep_total_calls, 200);
        assert_eq!(config.lifecycle.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.directory.lookup_attempts, 5);
        assert_eq!(config.directory.lookup_backoff, Duration::from_secs(2));
        assert!(!config
            .implementations
            .iter()
            .any(|imp| imp.kind == TransportKind::Directory));

        let from_default = Config::default();
        assert_eq!(from_default.harness, config.harness);
    }

    #[test]
    fn test_in_process_never_isolated() {
        let yaml = r#"
implementations:
  - kind: in-process
    isolated: true
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert!(!config.implementations[0].isolated);
        assert_eq!(config.implementations[0].name(), "in-process");
    }

    #[test]
    fn test_unknown_kind() {
        let yaml = r#"
implementations:
  - kind: carrier-pigeon
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_missing_kind() {
        let yaml = r#"
implementations:
  - isolated: true
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_duplicate_implementations() {
        let yaml = r#"
implementations:
  - kind: framed
  - kind: framed
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_empty_implementations() {
        assert!(ConfigLoader::load_string("implementations: []").is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let yaml = r#"
harness:
  concurrency_limit: 0
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_call_timeout_above_batch_timeout_rejected() {
        let yaml = r#"
harness:
  call_timeout_ms: 200000
  batch_timeout_ms: 100000
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_ready_timeout_out_of_range() {
        let yaml = r#"
lifecycle:
  ready_timeout_ms: 10
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_bad_directory_address() {
        let yaml = r#"
directory:
  address: not-an-address
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
harness:
  roundz: 3
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_with_implementations_override() {
        let config = Config::default()
            .with_implementations(&[TransportKind::Threaded, TransportKind::InProcess], true)
            .unwrap();
        let names: Vec<_> = config.implementations.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["threaded-isolated", "in-process"]);

        assert!(Config::default().with_implementations(&[], false).is_err());
    }

    #[test]
    fn test_example_config_loads() {
        let config =
            ConfigLoader::load_string(include_str!("../../rpcbench.example.yaml")).unwrap();
        let names: Vec<_> = config.implementations.iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec!["in-process", "threaded", "message-queue", "framed", "broker-isolated"]
        );
        assert_eq!(config.harness, Config::default().harness);
    }
}
