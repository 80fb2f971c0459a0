//! Generic queue consumer with automatic re-subscription.
//!
//! Every service in the booking system receives its messages the same way:
//! consume one queue, hand each envelope to a handler, keep going when a single
//! message is bad, re-subscribe when the stream is lost, and stop on shutdown.
//! [`Consumer`] implements that loop once; services only implement
//! [`EnvelopeHandler`].
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe (with backoff):
//!         attempts exhausted -> log error, stop
//!     process deliveries:
//!         - hand envelope to handler
//!         - log and drop rejected envelopes (don't crash)
//!         - check shutdown signal
//!     stream ended -> reconnect
//! }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = Consumer::new(
//!     "rental-agent",
//!     Binding::direct(RENTAL_AGENT_QUEUE, RENTAL_AGENT_KEY),
//!     bus,
//!     handler,
//!     shutdown_rx,
//! )
//! .with_retry_policy(policy);
//!
//! consumer.declare().await?;
//! let handle = consumer.spawn();
//! ```

use crate::metrics::BusMetrics;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use booking_core::bus::{Binding, BusError, DeliveryStream, MessageBus};
use booking_core::envelope::Envelope;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Error returned by handlers; logged by the consumer, never fatal.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for envelopes delivered to one queue.
///
/// Errors are logged by the [`Consumer`] and the envelope is dropped; the
/// consumer continues with the next delivery.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Process one envelope.
    ///
    /// # Errors
    ///
    /// Returns an error when the envelope is malformed or cannot be processed.
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Why a consumer loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Shutdown signal received
    Shutdown,
    /// Could not (re-)subscribe within the retry policy
    Unreachable(BusError),
}

/// Consumer of one bus queue.
///
/// # Lifecycle
///
/// 1. Created via [`Consumer::new`]
/// 2. Optionally [`declare`](Consumer::declare)d so that messages published
///    before the task runs are buffered
/// 3. Spawned as background task via [`spawn`](Consumer::spawn)
/// 4. Runs until the shutdown signal fires or the bus stays unreachable
///    past the retry policy
pub struct Consumer {
    name: String,
    binding: Binding,
    bus: Arc<dyn MessageBus>,
    handler: Arc<dyn EnvelopeHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_policy: RetryPolicy,
}

impl Consumer {
    /// Create a new consumer with the default retry policy.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        binding: Binding,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn EnvelopeHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            binding,
            bus,
            handler,
            shutdown,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Set the policy used for (re-)subscribing.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Consumer name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue binding this consumer reads from.
    #[must_use]
    pub const fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Declare the queue so deliveries are buffered before the loop starts.
    ///
    /// # Errors
    ///
    /// Returns the bus error once the retry policy is exhausted.
    pub async fn declare(&self) -> Result<(), BusError> {
        crate::retry::retry_with_backoff(&self.retry_policy, "declare_queue", || {
            self.bus.declare(&self.binding)
        })
        .await
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<ConsumerExit> {
        tokio::spawn(async move { self.run().await })
    }

    /// Main loop: subscribe, process, reconnect.
    async fn run(&mut self) -> ConsumerExit {
        info!(consumer = %self.name, queue = %self.binding.queue, "Consumer started");
        let mut reconnecting = false;

        let exit = loop {
            let mut stream = match self.subscribe_with_backoff().await {
                Ok(Some(stream)) => stream,
                Ok(None) => break ConsumerExit::Shutdown,
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        queue = %self.binding.queue,
                        error = %e,
                        "Giving up on queue after exhausting retries"
                    );
                    break ConsumerExit::Unreachable(e);
                },
            };

            if reconnecting {
                BusMetrics::record_reconnect(&self.name);
            }
            info!(consumer = %self.name, route = %self.binding.route, "Subscribed to queue");

            if self.process_stream(&mut stream).await {
                break ConsumerExit::Shutdown;
            }

            warn!(consumer = %self.name, "Delivery stream ended, re-subscribing");
            reconnecting = true;
        };

        info!(consumer = %self.name, ?exit, "Consumer stopped");
        exit
    }

    /// Subscribe, backing off between failed attempts.
    ///
    /// Returns `Ok(None)` when shutdown is signalled while waiting.
    async fn subscribe_with_backoff(&mut self) -> Result<Option<DeliveryStream>, BusError> {
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                _ = self.shutdown.recv() => return Ok(None),
                result = self.bus.subscribe(&self.binding) => result,
            };

            match result {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) => {
                    attempt += 1;
                    if !self.retry_policy.should_retry(attempt) {
                        return Err(e);
                    }
                    let delay = self.retry_policy.delay_for_attempt(attempt - 1);
                    warn!(
                        consumer = %self.name,
                        attempt,
                        error = %e,
                        "Failed to subscribe, retrying in {:?}",
                        delay
                    );
                    tokio::select! {
                        _ = self.shutdown.recv() => return Ok(None),
                        () = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }

    /// Process deliveries until the stream ends or shutdown is signalled.
    ///
    /// Returns `true` on shutdown.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Consumer received shutdown signal during processing");
                    return true;
                }
                delivery = stream.next() => {
                    match delivery {
                        Some(Ok(envelope)) => {
                            let kind = envelope.kind.clone();
                            debug!(consumer = %self.name, kind = %kind, "Delivery received");
                            match self.handler.handle(envelope).await {
                                Ok(()) => BusMetrics::record_consume(&self.name),
                                Err(e) => {
                                    BusMetrics::record_drop(&self.name);
                                    warn!(
                                        consumer = %self.name,
                                        kind = %kind,
                                        error = %e,
                                        "Dropped message"
                                    );
                                },
                            }
                        },
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "Error receiving from queue");
                        },
                        None => return false,
                    }
                }
            }
        }
    }
}
