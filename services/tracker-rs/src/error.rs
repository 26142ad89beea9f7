use std::time::Duration;

use thiserror::Error;

/// Failure to establish a broker session.
///
/// DNS, auth, TLS and reachability problems all land here; the pool does not
/// distinguish them. `Clone` because one connect attempt is shared by every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("broker refused session ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("producer pool is draining")]
    Draining,
    #[error("connect attempt aborted: {0}")]
    Aborted(String),
}

/// Failure while handing one message to the broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("broker rejected record ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("could not encode event: {0}")]
    Encode(String),
}

/// Invalid service configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment: {0}")]
    Env(#[from] envy::Error),
    #[error("unknown KAFKA_TRANSPORT '{0}' (expected 'direct', 'rest' or 'disabled')")]
    UnknownTransport(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("KAFKA_SSL=true needs a build with the `tls` feature")]
    TlsUnavailable,
}
