//! Per-beacon orchestration: answer the caller at once, deliver on the side.
//!
//! ```text
//! POST /track ─▶ event::build ─▶ 200 {success, eventId, ...}
//!                      │
//!                      └─ tokio::spawn ─▶ deliver(event)
//!                                            ├─ no broker ─▶ Skipped
//!                                            ├─ pool.acquire(connect_timeout)
//!                                            │     └─ err ─▶ ConnectFailed
//!                                            └─ send within send_timeout
//!                                                  ├─ ok  ─▶ Delivered
//!                                                  └─ err ─▶ invalidate ─▶ SendFailed
//! ```
//!
//! Each event gets one attempt. A failed send is not retried; the next
//! event reconnects through the pool.

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::enums::{ProducerState, TransportKind};
use crate::error::{ConnectError, SendError};
use crate::event::{self, TrackingEvent};
use crate::metrics::{
    AppMetrics, OUTCOME_CONNECT_FAILED, OUTCOME_DELIVERED, OUTCOME_SEND_FAILED, OUTCOME_SKIPPED,
};
use crate::pool::ProducerPool;
use crate::transport::{self, Delivery, OutboundMessage};

/// Success body returned to the beacon sender.
#[derive(Debug, Clone, Serialize)]
pub struct TrackAccepted {
    pub success: bool,
    #[serde(rename = "eventId")]
    pub event_id: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No broker configured. Expected, not an error.
    Skipped,
    ConnectFailed(ConnectError),
    SendFailed(SendError),
    Delivered(Delivery),
}

pub struct DeliveryCoordinator {
    pool: Option<Arc<ProducerPool>>,
    transport: TransportKind,
    source: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    metrics: Arc<AppMetrics>,
}

impl DeliveryCoordinator {
    pub fn new(
        config: &Config,
        pool: Option<Arc<ProducerPool>>,
        transport: TransportKind,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            pool,
            transport,
            source: config.source.clone(),
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
            metrics,
        }
    }

    /// Wire the transport named by `config`, or none when no broker is configured.
    pub fn from_config(config: &Config, metrics: Arc<AppMetrics>) -> Self {
        let pool = transport::connector_for(config).map(|c| Arc::new(ProducerPool::new(c)));
        Self::new(config, pool, config.transport(), metrics)
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// `None` when delivery is disabled.
    pub async fn producer_state(&self) -> Option<ProducerState> {
        match &self.pool {
            Some(pool) => Some(pool.state().await),
            None => None,
        }
    }

    fn accepted_message(&self) -> &'static str {
        match self.transport {
            TransportKind::Direct => "Event tracked (direct Kafka mode)",
            TransportKind::Rest => "Event tracked (REST mode)",
            TransportKind::Disabled => "Event tracked (logged only)",
        }
    }

    /// Build the event, detach its delivery, and return the caller's reply.
    ///
    /// The returned `JoinHandle` may be dropped; the task keeps running.
    pub fn handle(
        self: &Arc<Self>,
        body: &Value,
        headers: &HeaderMap,
    ) -> (TrackAccepted, JoinHandle<DeliveryOutcome>) {
        let event = event::build(body, headers);
        self.metrics.events_accepted_total.inc();
        tracing::info!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            ip = %event.client_address(),
            url = %event.url(),
            "tracking event accepted"
        );

        let accepted = TrackAccepted {
            success: true,
            event_id: event.id().to_string(),
            message: self.accepted_message().to_string(),
            timestamp: event.timestamp_iso(),
        };

        let coordinator = Arc::clone(self);
        let delivery = tokio::spawn(async move { coordinator.deliver(event).await });
        (accepted, delivery)
    }

    /// One best-effort delivery attempt. Never panics, never propagates.
    pub async fn deliver(&self, event: TrackingEvent) -> DeliveryOutcome {
        let Some(pool) = &self.pool else {
            tracing::info!(event_id = %event.id(), "no broker configured, delivery skipped");
            self.metrics.delivery(OUTCOME_SKIPPED);
            return DeliveryOutcome::Skipped;
        };

        let message = match OutboundMessage::from_event(&event, &self.source) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(event_id = %event.id(), "event encoding failed: {e}");
                self.metrics.delivery(OUTCOME_SEND_FAILED);
                return DeliveryOutcome::SendFailed(e);
            }
        };

        let handle = match pool.acquire(self.connect_timeout).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(event_id = %event.id(), transport = %self.transport, "event dropped, broker connect failed: {e}");
                self.metrics.delivery(OUTCOME_CONNECT_FAILED);
                return DeliveryOutcome::ConnectFailed(e);
            }
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.send_timeout, handle.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(self.send_timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(delivery) => {
                tracing::info!(
                    event_id = %event.id(),
                    partition = ?delivery.partition,
                    offset = ?delivery.offset,
                    elapsed_ms,
                    "event delivered"
                );
                self.metrics.delivery(OUTCOME_DELIVERED);
                DeliveryOutcome::Delivered(delivery)
            }
            Err(e) => {
                if pool.invalidate(&handle).await {
                    self.metrics.producer_invalidations_total.inc();
                }
                tracing::warn!(
                    event_id = %event.id(),
                    generation = handle.generation(),
                    elapsed_ms,
                    "event dropped, send failed: {e}"
                );
                self.metrics.delivery(OUTCOME_SEND_FAILED);
                DeliveryOutcome::SendFailed(e)
            }
        }
    }

    /// Shutdown hook: close the cached producer.
    pub async fn drain(&self) {
        if let Some(pool) = &self.pool {
            pool.drain().await;
        }
    }
}
