//! Process-wide cache of one connected broker producer.
//!
//! ```text
//!                 acquire()                 connect ok
//! Disconnected ─────────────▶ Connecting ─────────────▶ Connected
//!      ▲                          │                         │
//!      │   connect error/timeout  │     invalidate(handle)  │
//!      └──────────────────────────┴─────────────────────────┘
//!
//! drain() from any state ─▶ Drained (terminal)
//! ```
//!
//! Concurrent `acquire` calls during Connecting join the same attempt, so a
//! burst of beacons opens one session. Invalidation is keyed on the handle's
//! generation: a late failure report about a superseded producer cannot
//! discard a newer, healthy one.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::enums::ProducerState;
use crate::error::{ConnectError, SendError};
use crate::transport::{Connector, Delivery, OutboundMessage, Producer};

type ConnectAttempt = Shared<BoxFuture<'static, Result<ProducerHandle, ConnectError>>>;

/// A connected producer plus the generation that identifies it.
#[derive(Clone)]
pub struct ProducerHandle {
    generation: u64,
    producer: Arc<dyn Producer>,
}

impl ProducerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendError> {
        self.producer.send(message).await
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

enum Slot {
    Disconnected,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Connected(ProducerHandle),
    Drained,
}

impl Slot {
    fn state(&self) -> ProducerState {
        match self {
            Self::Disconnected => ProducerState::Disconnected,
            Self::Connecting { .. } => ProducerState::Connecting,
            Self::Connected(_) => ProducerState::Connected,
            Self::Drained => ProducerState::Drained,
        }
    }

    fn is_connecting(&self, generation: u64) -> bool {
        matches!(self, Self::Connecting { generation: g, .. } if *g == generation)
    }
}

pub struct ProducerPool {
    connector: Arc<dyn Connector>,
    slot: Arc<Mutex<Slot>>,
    generations: AtomicU64,
}

impl ProducerPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slot: Arc::new(Mutex::new(Slot::Disconnected)),
            generations: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ProducerState {
        self.slot.lock().await.state()
    }

    /// Hand out the cached producer, or start/join a connect attempt bounded
    /// by `connect_timeout`.
    pub async fn acquire(&self, connect_timeout: Duration) -> Result<ProducerHandle, ConnectError> {
        let (generation, attempt) = {
            let mut slot = self.slot.lock().await;
            let in_flight = match &*slot {
                Slot::Connected(handle) => return Ok(handle.clone()),
                Slot::Drained => return Err(ConnectError::Draining),
                Slot::Connecting {
                    generation,
                    attempt,
                } => Some((*generation, attempt.clone())),
                Slot::Disconnected => None,
            };
            match in_flight {
                Some((generation, attempt)) => {
                    tracing::debug!(generation, "joining in-flight producer connect");
                    (generation, attempt)
                }
                None => {
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
                    let attempt = self.start_connect(generation, connect_timeout);
                    *slot = Slot::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        match tokio::time::timeout(connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                let mut slot = self.slot.lock().await;
                if slot.is_connecting(generation) {
                    *slot = Slot::Disconnected;
                }
                tracing::warn!(generation, ?connect_timeout, "producer connect timed out");
                Err(ConnectError::Timeout(connect_timeout))
            }
        }
    }

    /// Spawn the connect so it runs to completion even after every waiter
    /// has given up; the task itself records the outcome in the slot.
    fn start_connect(&self, generation: u64, connect_timeout: Duration) -> ConnectAttempt {
        let connector = Arc::clone(&self.connector);
        let slot = Arc::clone(&self.slot);

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(connect_timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout(connect_timeout)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let mut guard = slot.lock().await;
            let current = guard.is_connecting(generation);
            match outcome {
                Ok(producer) => {
                    let handle = ProducerHandle {
                        generation,
                        producer,
                    };
                    if current {
                        *guard = Slot::Connected(handle.clone());
                        tracing::info!(generation, elapsed_ms, "producer connected");
                        return Ok(handle);
                    }
                    let drained = matches!(*guard, Slot::Drained);
                    drop(guard);
                    tracing::info!(generation, drained, "closing producer from superseded connect");
                    handle.producer.close().await;
                    Err(if drained {
                        ConnectError::Draining
                    } else {
                        ConnectError::Aborted("connect attempt superseded".to_string())
                    })
                }
                Err(e) => {
                    if current {
                        *guard = Slot::Disconnected;
                    }
                    tracing::warn!(generation, elapsed_ms, "producer connect failed: {e}");
                    Err(e)
                }
            }
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(ConnectError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    /// Drop `handle` if it is still the cached producer. Returns whether it was.
    pub async fn invalidate(&self, handle: &ProducerHandle) -> bool {
        {
            let mut slot = self.slot.lock().await;
            let cached = matches!(
                &*slot,
                Slot::Connected(current) if current.generation == handle.generation
            );
            if !cached {
                tracing::debug!(
                    generation = handle.generation,
                    "ignoring invalidate for a producer that is no longer cached"
                );
                return false;
            }
            *slot = Slot::Disconnected;
        }

        tracing::info!(generation = handle.generation, "producer invalidated");
        let producer = Arc::clone(&handle.producer);
        tokio::spawn(async move { producer.close().await });
        true
    }

    /// Close the live producer and refuse further acquires. An in-flight
    /// connect is awaited; its task closes whatever it produces.
    pub async fn drain(&self) {
        let previous = {
            let mut slot = self.slot.lock().await;
            std::mem::replace(&mut *slot, Slot::Drained)
        };

        match previous {
            Slot::Connected(handle) => {
                handle.producer.close().await;
                tracing::info!(generation = handle.generation, "producer drained");
            }
            Slot::Connecting {
                generation,
                attempt,
            } => {
                tracing::info!(generation, "waiting for in-flight connect before drain");
                let _ = attempt.await;
            }
            Slot::Disconnected | Slot::Drained => {}
        }
    }
}
