use crate::enums::{HealthStatus, ProducerState, TransportKind};
use serde::{Deserialize, Serialize};

/// Response for GET /track.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackStatus {
    pub status: String,
    pub timestamp: String,
    pub kafka_available: bool,
    pub transport: TransportKind,
    /// Absent when delivery is disabled.
    pub producer: Option<ProducerState>,
}

/// Liveness response. The service stays healthy while the broker is down.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub broker: Option<ProducerState>,
}

/// Body of a 500 from the tracking endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackFailure {
    pub success: bool,
    pub error: String,
    pub message: String,
}
