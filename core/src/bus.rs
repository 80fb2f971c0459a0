//! Message bus abstraction for service-to-service communication.
//!
//! Services never call each other directly. Every request and response is an
//! [`Envelope`] published on a [`MessageBus`] and consumed from a named queue.
//!
//! # Exchanges
//!
//! The bus offers two exchange kinds:
//!
//! - **Direct**: a message is routed to the queues bound with exactly its
//!   routing key. Used for point-to-point requests and replies.
//! - **Fanout**: a message is copied to every queue bound to the exchange.
//!   Used for building creation broadcasts.
//!
//! ```text
//!  client ──direct(RENTAL_AGENT)──▶ agent ──direct(BUILDING_KEY1)──▶ building 1
//!     ▲                               │ ▲                               │
//!     └────direct(CLIENT_KEY<name)────┘ └─────direct(RENTAL_AGENT)──────┘
//! ```
//!
//! # Delivery
//!
//! Delivery is at-least-once within a session with no ordering guarantee across
//! distinct queues. Consumers must tolerate duplicates.
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
//! so that services can share one `Arc<dyn MessageBus>` handle and reducers can
//! capture it inside effects.

use crate::envelope::Envelope;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The broker connection is down
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed on route '{route}': {reason}")]
    PublishFailed {
        /// Route of the failed publish
        route: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to declare or consume a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// Queue that could not be consumed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error surfaced on an open stream
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Where a published message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Direct exchange with an exact routing key
    Direct {
        /// Routing key
        key: String,
    },
    /// Fanout exchange (every bound queue)
    Fanout,
}

impl Route {
    /// Direct route for a routing key
    #[must_use]
    pub fn direct(key: impl Into<String>) -> Self {
        Self::Direct { key: key.into() }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { key } => write!(f, "direct:{key}"),
            Self::Fanout => write!(f, "fanout"),
        }
    }
}

/// A named queue and the route it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    /// Queue name (unique per consumer)
    pub queue: String,
    /// Route whose messages land in the queue
    pub route: Route,
}

impl Binding {
    /// Bind a queue to a direct routing key
    #[must_use]
    pub fn direct(queue: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            route: Route::direct(key),
        }
    }

    /// Bind a queue to the fanout exchange
    #[must_use]
    pub fn fanout(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            route: Route::Fanout,
        }
    }
}

/// Stream of deliveries from one queue.
///
/// The stream ends when the broker connection is lost; consumers are expected
/// to re-subscribe.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Envelope, BusError>> + Send>>;

/// Boxed future returned by [`MessageBus`] operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Trait for message bus implementations.
///
/// All implementations must be `Send + Sync` so that one handle can be shared
/// by every service and effect executor.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope along a route.
    ///
    /// A direct publish whose key has no bound queue is accepted and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] or [`BusError::PublishFailed`]
    /// when the broker did not accept the message.
    fn publish<'a>(&'a self, route: &'a Route, envelope: &'a Envelope) -> BusFuture<'a, ()>;

    /// Declare a queue and bind it to its route.
    ///
    /// Declaring is idempotent. Messages routed to a declared queue are
    /// buffered until a consumer subscribes.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the queue cannot be declared.
    fn declare<'a>(&'a self, binding: &'a Binding) -> BusFuture<'a, ()>;

    /// Declare the queue (if needed) and consume it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the queue cannot be consumed.
    fn subscribe<'a>(&'a self, binding: &'a Binding) -> BusFuture<'a, DeliveryStream>;
}
