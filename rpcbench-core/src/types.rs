// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and enums shared across the harness.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a directory service name.
const MAX_SERVICE_NAME_LEN: usize = 128;

/// The transport implementations the harness knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Direct function call, no transport at all. Baseline.
    InProcess,
    /// Thread-per-connection server, blocking client socket per call.
    Threaded,
    /// Multiplexed requests over one persistent connection.
    MessageQueue,
    /// Length-delimited frames, fresh async connection per call.
    Framed,
    /// Object broker always reached through the directory service.
    Directory,
    /// Object broker reached directly, or through the directory when isolated.
    Broker,
}

impl TransportKind {
    /// Every kind, in canonical order.
    pub const ALL: [TransportKind; 6] = [
        Self::InProcess,
        Self::Threaded,
        Self::MessageQueue,
        Self::Framed,
        Self::Directory,
        Self::Broker,
    ];

    /// Get the kind name used on the command line and in result files.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Threaded => "threaded",
            Self::MessageQueue => "message-queue",
            Self::Framed => "framed",
            Self::Directory => "directory",
            Self::Broker => "broker",
        }
    }

    /// Whether the backend can run in a separate server process.
    pub fn supports_isolation(&self) -> bool {
        !matches!(self, Self::InProcess)
    }

    /// Whether the client locates the server through the directory service.
    pub fn uses_directory(&self, isolated: bool) -> bool {
        match self {
            Self::Directory => true,
            Self::Broker => isolated,
            _ => false,
        }
    }

    /// Whether the in-process server runs on OS threads rather than tasks.
    pub fn uses_thread_server(&self) -> bool {
        matches!(self, Self::Threaded | Self::Directory)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TransportKind {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HardValidationError::UnknownTransportKind {
                value: s.to_string(),
            })
    }
}

/// Whether concurrent calls may share one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sharing {
    /// One handle serves all in-flight calls.
    Shared,
    /// Each call opens its own connection.
    PerCall,
}

impl fmt::Display for Sharing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::PerCall => write!(f, "per_call"),
        }
    }
}

/// Argument and result of the unary "double" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Int(i64),
    Text(String),
}

impl Payload {
    /// A text payload of `len` bytes.
    pub fn text_of_len(len: usize) -> Self {
        Self::Text("x".repeat(len))
    }

    /// `2 * v` for integers, `s + s` for text. `None` on integer overflow.
    pub fn doubled(&self) -> Option<Payload> {
        match self {
            Self::Int(v) => v.checked_mul(2).map(Self::Int),
            Self::Text(s) => Some(Self::Text(s.repeat(2))),
        }
    }

    /// Size of the payload as sent on the wire, ignoring framing.
    pub fn len(&self) -> usize {
        match self {
            Self::Int(_) => std::mem::size_of::<i64>(),
            Self::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    /// Short description for logs; never prints large strings.
    pub fn describe(&self) -> String {
        match self {
            Self::Int(v) => format!("int({})", v),
            Self::Text(s) => format!("text(len={})", s.len()),
        }
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Validated logical name registered in the directory service.
/// Non-empty, alphanumeric with `.`, `-` and `_`, max 128 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Create a new ServiceName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_name",
                value: name,
                reason: "Service name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_SERVICE_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_name",
                value: name.clone(),
                reason: format!(
                    "Service name too long: {} chars (max {})",
                    name.len(),
                    MAX_SERVICE_NAME_LEN
                ),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_name",
                value: name,
                reason: "Service name must contain only alphanumeric characters, dots, hyphens, and underscores".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// A name that will not collide with concurrently running benchmarks.
    pub fn unique(prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let prefix: String = prefix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            .take(MAX_SERVICE_NAME_LEN - suffix.len() - 1)
            .collect();
        if prefix.is_empty() {
            Self(suffix)
        } else {
            Self(format!("{}.{}", prefix, suffix))
        }
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}
