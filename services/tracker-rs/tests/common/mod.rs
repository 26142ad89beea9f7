//! Shared test doubles for the tracker integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use prometheus::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracker::{
    config::Config,
    coordinator::DeliveryCoordinator,
    enums::TransportKind,
    error::{ConnectError, SendError},
    metrics::AppMetrics,
    pool::ProducerPool,
    state::AppState,
    transport::{Connector, Delivery, OutboundMessage, Producer},
};

/// Knobs for [`MockConnector`].
#[derive(Debug, Default, Clone)]
pub struct MockOptions {
    pub connect_delay: Duration,
    pub send_delay: Duration,
    /// The next N connects fail.
    pub connect_failures: usize,
    /// The next N sends fail, whichever session they go through.
    pub send_failures: usize,
}

/// One message accepted by the fake broker.
#[derive(Debug, Clone)]
pub struct Sent {
    /// 1-based number of the connect that produced the session.
    pub session: usize,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct Broker {
    connect_delay: Duration,
    send_delay: Duration,
    connect_failures: AtomicUsize,
    send_failures: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory broker with call counters. Clones share state.
#[derive(Clone, Default)]
pub struct MockConnector {
    broker: Arc<Broker>,
}

impl MockConnector {
    pub fn new(options: MockOptions) -> Self {
        Self {
            broker: Arc::new(Broker {
                connect_delay: options.connect_delay,
                send_delay: options.send_delay,
                connect_failures: AtomicUsize::new(options.connect_failures),
                send_failures: AtomicUsize::new(options.send_failures),
                ..Default::default()
            }),
        }
    }

    pub fn connects(&self) -> usize {
        self.broker.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.broker.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.broker.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Producer>, ConnectError> {
        let session = self.broker.connects.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.broker.connect_delay).await;
        if take_one(&self.broker.connect_failures) {
            return Err(ConnectError::Unreachable("mock broker refused".into()));
        }
        Ok(Arc::new(MockProducer {
            session,
            broker: Arc::clone(&self.broker),
        }))
    }
}

struct MockProducer {
    session: usize,
    broker: Arc<Broker>,
}

#[async_trait]
impl Producer for MockProducer {
    async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendError> {
        tokio::time::sleep(self.broker.send_delay).await;
        if take_one(&self.broker.send_failures) {
            return Err(SendError::Transport("mock connection reset".into()));
        }
        let mut sent = self.broker.sent.lock().unwrap();
        sent.push(Sent {
            session: self.session,
            message: message.clone(),
        });
        Ok(Delivery {
            partition: Some(0),
            offset: Some(sent.len() as i64 - 1),
        })
    }

    async fn close(&self) {
        self.broker.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(pairs: &[(&str, &str)]) -> Config {
    Config::from_vars(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    )
    .expect("test config must parse")
}

/// Config that names a broker, so delivery is enabled.
pub fn broker_config() -> Config {
    config(&[("KAFKA_BROKERS", "mock-broker:9092")])
}

pub fn metrics() -> (Registry, Arc<AppMetrics>) {
    let registry = Registry::new();
    let metrics = AppMetrics::new(&registry).expect("metrics register");
    (registry, Arc::new(metrics))
}

/// Coordinator wired to `connector` through a fresh pool.
pub fn coordinator(
    config: &Config,
    connector: &MockConnector,
    metrics: Arc<AppMetrics>,
) -> Arc<DeliveryCoordinator> {
    let pool = Arc::new(ProducerPool::new(Arc::new(connector.clone())));
    Arc::new(DeliveryCoordinator::new(
        config,
        Some(pool),
        TransportKind::Direct,
        metrics,
    ))
}

/// App state for router tests. `None` wires the coordinator from `config` alone.
pub fn app_state(config: Config, connector: Option<&MockConnector>) -> Arc<AppState> {
    let (registry, metrics) = metrics();
    let coordinator = match connector {
        Some(connector) => coordinator(&config, connector, Arc::clone(&metrics)),
        None => Arc::new(DeliveryCoordinator::from_config(&config, Arc::clone(&metrics))),
    };
    AppState::new(config, coordinator, metrics, registry)
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
