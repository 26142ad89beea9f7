/// Shared enums for the tracking service.
///
/// They serialize to lowercase strings so the probe and health payloads stay
/// stable JSON.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Health check status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// How events reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Native Kafka protocol through librdkafka.
    Direct,
    /// Confluent-style Kafka REST proxy over HTTPS.
    Rest,
    /// No broker configured; events are only logged.
    Disabled,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Rest => "rest",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "kafka" => Ok(Self::Direct),
            "rest" => Ok(Self::Rest),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of the process-wide producer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    Disconnected,
    Connecting,
    Connected,
    Drained,
}
