//! Broker transport seam.
//!
//! A [`Connector`] establishes a session and yields a [`Producer`]; the pool
//! caches that producer and the coordinator sends through it. Direct Kafka
//! and the REST proxy are the two production strategies; tests plug in
//! their own doubles.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{BrokerConfig, Config};
use crate::error::{ConnectError, SendError};
use crate::event::TrackingEvent;
use crate::kafka::KafkaConnector;
use crate::rest::RestProxyConnector;

pub const EVENT_TYPE_HEADER: &str = "event-type";
pub const SOURCE_HEADER: &str = "source";

/// One broker record, already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn from_event(event: &TrackingEvent, source: &str) -> Result<Self, SendError> {
        let payload = event
            .to_json_bytes()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        Ok(Self {
            key: event.id().to_string(),
            payload,
            headers: vec![
                (EVENT_TYPE_HEADER.to_string(), event.event_type().to_string()),
                (SOURCE_HEADER.to_string(), source.to_string()),
            ],
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Where the broker placed a record, when the transport reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// A connected broker session.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendError>;

    /// Best-effort teardown. Errors are logged, never returned.
    async fn close(&self) {}
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Producer>, ConnectError>;
}

/// Pick the connector for the configured transport. `None` when delivery is disabled.
pub fn connector_for(config: &Config) -> Option<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.broker.as_ref()? {
        BrokerConfig::Direct {
            brokers,
            credentials,
            tls,
        } => Arc::new(KafkaConnector::new(
            brokers.clone(),
            credentials.clone(),
            *tls,
            config.client_id.clone(),
            config.topic.clone(),
            config.connect_timeout,
            config.send_timeout,
        )),
        BrokerConfig::Rest {
            base_url,
            credentials,
        } => Arc::new(RestProxyConnector::new(
            base_url.clone(),
            credentials.clone(),
            config.topic.clone(),
            config.connect_timeout,
            config.send_timeout,
        )),
    };
    Some(connector)
}
