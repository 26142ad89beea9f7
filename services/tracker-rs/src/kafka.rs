use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{ConnectError, SendError};
use crate::transport::{Connector, Delivery, OutboundMessage, Producer};

/// librdkafka rejects connection setup timeouts below one second.
const MIN_SETUP_TIMEOUT_MS: u128 = 1000;

/// Opens native Kafka sessions through librdkafka.
pub struct KafkaConnector {
    brokers: Vec<String>,
    credentials: Option<Credentials>,
    tls: bool,
    client_id: String,
    topic: String,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl KafkaConnector {
    pub fn new(
        brokers: Vec<String>,
        credentials: Option<Credentials>,
        tls: bool,
        client_id: String,
        topic: String,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            brokers,
            credentials,
            tls,
            client_id,
            topic,
            connect_timeout,
            send_timeout,
        }
    }

    /// Producer settings tuned for one-record-at-a-time beacons.
    pub fn client_config(&self) -> ClientConfig {
        let setup_ms = self.connect_timeout.as_millis().max(MIN_SETUP_TIMEOUT_MS);
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id)
            .set("message.timeout.ms", self.send_timeout.as_millis().to_string())
            .set("socket.connection.setup.timeout.ms", setup_ms.to_string())
            .set("queue.buffering.max.ms", "0")
            .set("max.in.flight.requests.per.connection", "1")
            .set("enable.idempotence", "false");

        let protocol = match (self.credentials.is_some(), self.tls) {
            (true, true) => "SASL_SSL",
            (true, false) => "SASL_PLAINTEXT",
            (false, true) => "SSL",
            (false, false) => "PLAINTEXT",
        };
        config.set("security.protocol", protocol);

        if let Some(creds) = &self.credentials {
            config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", &creds.username)
                .set("sasl.password", &creds.password);
        }
        config
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    /// Creating a librdkafka client does no I/O, so the session is only
    /// considered open once topic metadata comes back from a broker.
    /// Both steps run on the blocking pool; a client that fails the metadata
    /// fetch is destroyed there too.
    async fn connect(&self) -> Result<Arc<dyn Producer>, ConnectError> {
        let config = self.client_config();
        let topic = self.topic.clone();
        let timeout = self.connect_timeout;
        let (producer, brokers) = tokio::task::spawn_blocking(move || {
            let producer: FutureProducer = config
                .create()
                .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
            let brokers = producer
                .client()
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| match e {
                    KafkaError::MetadataFetch(RDKafkaErrorCode::OperationTimedOut) => {
                        ConnectError::Timeout(timeout)
                    }
                    other => ConnectError::Unreachable(other.to_string()),
                })?
                .brokers()
                .len();
            if brokers == 0 {
                return Err(ConnectError::Unreachable(
                    "metadata listed no brokers".to_string(),
                ));
            }
            Ok::<_, ConnectError>((producer, brokers))
        })
        .await
        .map_err(|e| ConnectError::Aborted(e.to_string()))??;

        tracing::debug!(brokers, topic = %self.topic, "kafka metadata fetched");
        Ok(Arc::new(KafkaProducer::new(
            producer,
            self.topic.clone(),
            self.send_timeout,
        )))
    }
}

/// A connected librdkafka producer.
///
/// Destroying the client joins its polling thread, so the last drop is
/// handed to the blocking pool whenever a runtime is around.
pub struct KafkaProducer {
    producer: Option<FutureProducer>,
    topic: String,
    send_timeout: Duration,
}

impl KafkaProducer {
    fn new(producer: FutureProducer, topic: String, send_timeout: Duration) -> Self {
        Self {
            producer: Some(producer),
            topic,
            send_timeout,
        }
    }
}

impl Drop for KafkaProducer {
    fn drop(&mut self) {
        let Some(producer) = self.producer.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(producer));
            }
            Err(_) => drop(producer),
        }
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendError> {
        let Some(producer) = &self.producer else {
            return Err(SendError::Transport("producer already closed".to_string()));
        };
        let headers = message
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value),
                })
            });
        let record = FutureRecord::to(&self.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(headers);

        match producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Delivery {
                partition: Some(partition),
                offset: Some(offset),
            }),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                Err(SendError::Timeout(self.send_timeout))
            }
            Err((e, _)) => Err(SendError::Transport(e.to_string())),
        }
    }

    async fn close(&self) {
        let Some(producer) = self.producer.clone() else {
            return;
        };
        let timeout = self.send_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => tracing::debug!("kafka producer flushed"),
            Ok(Err(e)) => tracing::warn!("kafka flush on close failed: {e}"),
            Err(e) => tracing::warn!("kafka close task failed: {e}"),
        }
    }
}
