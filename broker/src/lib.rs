//! In-process message broker for the room booking services.
//!
//! This crate provides [`InMemoryBus`], an implementation of the
//! [`MessageBus`] trait from `booking-core` that keeps every queue in memory.
//! It models the two exchanges the booking protocol relies on:
//!
//! - a **direct** exchange, where a message is delivered to the queues bound
//!   with exactly its routing key
//! - a **fanout** exchange, where a message is copied to every bound queue
//!
//! # Delivery Semantics
//!
//! - Queues are declared explicitly (or on first subscribe) and buffer
//!   messages until they are consumed.
//! - A direct publish with no bound queue is accepted and dropped, like an
//!   unroutable message on a real broker.
//! - Two consumers on one queue compete for its messages.
//! - [`InMemoryBus::disconnect`] simulates losing the broker: open delivery
//!   streams end after draining what was already queued, declared queues are
//!   forgotten, and every operation fails until [`InMemoryBus::reconnect`].
//!
//! # Example
//!
//! ```no_run
//! use booking_broker::InMemoryBus;
//! use booking_core::bus::{Binding, MessageBus, Route};
//! use booking_core::envelope::Envelope;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new("rental_direct", "buildings_fanout");
//!
//! let binding = Binding::direct("RENTAL_AGENT_QUEUE", "RENTAL_AGENT");
//! let mut deliveries = bus.subscribe(&binding).await?;
//!
//! bus.publish(&Route::direct("RENTAL_AGENT"), &Envelope::empty("RequestBuildings")).await?;
//!
//! if let Some(Ok(envelope)) = deliveries.next().await {
//!     println!("Received: {}", envelope.kind);
//! }
//! # Ok(())
//! # }
//! ```

use booking_core::bus::{BusError, BusFuture, Binding, DeliveryStream, MessageBus, Route};
use booking_core::envelope::Envelope;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// One declared queue.
///
/// The receiver is shared so that a consumer whose stream was dropped can
/// subscribe again without losing buffered messages.
struct Queue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }
}

/// Broker state behind the bus handle.
struct Broker {
    connected: bool,
    queues: HashMap<String, Queue>,
    direct: HashMap<String, BTreeSet<String>>,
    fanout: BTreeSet<String>,
}

impl Broker {
    fn declare(&mut self, binding: &Binding) {
        self.queues
            .entry(binding.queue.clone())
            .or_insert_with(Queue::new);

        match &binding.route {
            Route::Direct { key } => {
                self.direct
                    .entry(key.clone())
                    .or_default()
                    .insert(binding.queue.clone());
            },
            Route::Fanout => {
                self.fanout.insert(binding.queue.clone());
            },
        }
    }

    fn targets(&self, route: &Route) -> Vec<String> {
        match route {
            Route::Direct { key } => self
                .direct
                .get(key)
                .map(|queues| queues.iter().cloned().collect())
                .unwrap_or_default(),
            Route::Fanout => self.fanout.iter().cloned().collect(),
        }
    }
}

/// In-memory [`MessageBus`] with one direct and one fanout exchange.
///
/// Cloning the bus yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBus {
    direct_exchange: String,
    fanout_exchange: String,
    broker: Arc<Mutex<Broker>>,
}

impl InMemoryBus {
    /// Create a connected broker with the given exchange names.
    ///
    /// The names only appear in logs; routing is decided by [`Route`].
    #[must_use]
    pub fn new(direct_exchange: impl Into<String>, fanout_exchange: impl Into<String>) -> Self {
        Self {
            direct_exchange: direct_exchange.into(),
            fanout_exchange: fanout_exchange.into(),
            broker: Arc::new(Mutex::new(Broker {
                connected: true,
                queues: HashMap::new(),
                direct: HashMap::new(),
                fanout: BTreeSet::new(),
            })),
        }
    }

    /// Simulate losing the broker connection.
    ///
    /// Open delivery streams end once their buffered messages are consumed and
    /// every declared queue is forgotten.
    pub fn disconnect(&self) {
        if let Ok(mut broker) = self.broker.lock() {
            broker.connected = false;
            broker.queues.clear();
            broker.direct.clear();
            broker.fanout.clear();
            tracing::warn!("Broker connection lost");
        }
    }

    /// Restore the broker connection after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        if let Ok(mut broker) = self.broker.lock() {
            broker.connected = true;
            tracing::info!("Broker connection restored");
        }
    }

    /// Whether the broker is currently reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.broker.lock().is_ok_and(|broker| broker.connected)
    }

    fn exchange_name(&self, route: &Route) -> &str {
        match route {
            Route::Direct { .. } => &self.direct_exchange,
            Route::Fanout => &self.fanout_exchange,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Broker>, BusError> {
        self.broker
            .lock()
            .map_err(|_| BusError::ConnectionFailed("broker state poisoned".to_string()))
    }

    fn publish_now(&self, route: &Route, envelope: &Envelope) -> Result<(), BusError> {
        let broker = self.lock()?;
        if !broker.connected {
            return Err(BusError::ConnectionFailed(format!(
                "cannot publish {} to {route}: broker unreachable",
                envelope.kind
            )));
        }

        let targets = broker.targets(route);
        if targets.is_empty() {
            tracing::debug!(
                exchange = self.exchange_name(route),
                route = %route,
                kind = %envelope.kind,
                "Unroutable message dropped"
            );
            return Ok(());
        }

        for queue in &targets {
            let Some(target) = broker.queues.get(queue) else {
                continue;
            };
            target
                .sender
                .send(envelope.clone())
                .map_err(|_| BusError::PublishFailed {
                    route: route.to_string(),
                    reason: format!("queue '{queue}' is closed"),
                })?;
        }

        tracing::trace!(
            exchange = self.exchange_name(route),
            route = %route,
            kind = %envelope.kind,
            queues = targets.len(),
            "Message routed"
        );
        Ok(())
    }

    fn declare_now(&self, binding: &Binding) -> Result<(), BusError> {
        let mut broker = self.lock()?;
        if !broker.connected {
            return Err(BusError::SubscriptionFailed {
                queue: binding.queue.clone(),
                reason: "broker unreachable".to_string(),
            });
        }
        broker.declare(binding);
        tracing::debug!(
            exchange = self.exchange_name(&binding.route),
            queue = %binding.queue,
            route = %binding.route,
            "Queue declared"
        );
        Ok(())
    }

    fn receiver_for(
        &self,
        binding: &Binding,
    ) -> Result<Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>, BusError> {
        self.declare_now(binding)?;
        let broker = self.lock()?;
        broker
            .queues
            .get(&binding.queue)
            .map(|queue| Arc::clone(&queue.receiver))
            .ok_or_else(|| BusError::SubscriptionFailed {
                queue: binding.queue.clone(),
                reason: "queue vanished during declaration".to_string(),
            })
    }
}

impl MessageBus for InMemoryBus {
    fn publish<'a>(&'a self, route: &'a Route, envelope: &'a Envelope) -> BusFuture<'a, ()> {
        Box::pin(async move { self.publish_now(route, envelope) })
    }

    fn declare<'a>(&'a self, binding: &'a Binding) -> BusFuture<'a, ()> {
        Box::pin(async move { self.declare_now(binding) })
    }

    fn subscribe<'a>(&'a self, binding: &'a Binding) -> BusFuture<'a, DeliveryStream> {
        Box::pin(async move {
            let receiver = self.receiver_for(binding)?;
            let queue = binding.queue.clone();

            let stream = async_stream::stream! {
                loop {
                    let next = receiver.lock().await.recv().await;
                    match next {
                        Some(envelope) => yield Ok(envelope),
                        None => {
                            tracing::debug!(queue = %queue, "Queue closed, ending delivery stream");
                            break;
                        },
                    }
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
