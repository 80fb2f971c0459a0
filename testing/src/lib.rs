//! # Booking Testing
//!
//! Testing utilities and helpers for the room booking services.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - A recording message bus for asserting on published envelopes
//! - The [`ReducerTest`] Given-When-Then helper and effect assertions
//!
//! ## Example
//!
//! ```ignore
//! use booking_testing::{RecordingBus, test_clock};
//! use booking_runtime::Store;
//!
//! #[tokio::test]
//! async fn reserve_publishes_confirmation() {
//!     let bus = RecordingBus::new();
//!     let store = Store::new(BuildingState::new(1, 3), BuildingReducer, env(&bus));
//!
//!     store.send(BuildingAction::Reserve { room, metadata }).await.unwrap();
//!
//!     assert_eq!(bus.published_kinds(), vec!["ConfirmReservation"]);
//! }
//! ```

use booking_core::environment::{Clock, IdGenerator};
use chrono::{DateTime, Utc};

mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use booking_core::bus::{Binding, BusError, BusFuture, DeliveryStream, MessageBus, Route};
    use booking_core::envelope::Envelope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use booking_testing::mocks::FixedClock;
    /// use booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable ids: `{prefix}1`, `{prefix}2`, ...
    #[derive(Debug, Clone)]
    pub struct SequentialIds {
        prefix: String,
        next: Arc<AtomicUsize>,
    }

    impl SequentialIds {
        /// Start counting at 1
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                next: Arc::new(AtomicUsize::new(1)),
            }
        }

        /// Build a generator that returns `ids` in order, then continues with `{prefix}N`
        ///
        /// Used to force collisions on purpose.
        #[must_use]
        pub fn scripted(ids: &[&str]) -> ScriptedIds {
            ScriptedIds {
                ids: Arc::new(Mutex::new(ids.iter().rev().map(|s| (*s).to_string()).collect())),
                fallback: Self::new("fallback-"),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("{}{n}", self.prefix)
        }
    }

    /// Id generator replaying a fixed list first
    #[derive(Debug, Clone)]
    pub struct ScriptedIds {
        ids: Arc<Mutex<Vec<String>>>,
        fallback: SequentialIds,
    }

    impl IdGenerator for ScriptedIds {
        fn next_id(&self) -> String {
            let scripted = self.ids.lock().unwrap_or_else(PoisonError::into_inner).pop();
            scripted.unwrap_or_else(|| self.fallback.next_id())
        }
    }

    /// Message bus that records every accepted publish
    ///
    /// `subscribe` always fails; wire real consumers to an in-memory broker instead.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingBus {
        published: Arc<Mutex<Vec<(Route, Envelope)>>>,
        failures: Arc<AtomicUsize>,
    }

    impl RecordingBus {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject the next `n` publishes with [`BusError::ConnectionFailed`]
        pub fn fail_next(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }

        /// Everything published so far, in acceptance order
        #[must_use]
        pub fn published(&self) -> Vec<(Route, Envelope)> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Kinds of everything published so far
        #[must_use]
        pub fn published_kinds(&self) -> Vec<String> {
            self.published().into_iter().map(|(_, e)| e.kind).collect()
        }

        /// Envelopes published on one route
        #[must_use]
        pub fn published_to(&self, route: &Route) -> Vec<Envelope> {
            self.published()
                .into_iter()
                .filter(|(r, _)| r == route)
                .map(|(_, e)| e)
                .collect()
        }

        /// Forget everything recorded
        pub fn clear(&self) {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl MessageBus for RecordingBus {
        fn publish<'a>(&'a self, route: &'a Route, envelope: &'a Envelope) -> BusFuture<'a, ()> {
            Box::pin(async move {
                let failing = self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(BusError::ConnectionFailed("scripted failure".to_string()));
                }

                self.published
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((route.clone(), envelope.clone()));
                Ok(())
            })
        }

        fn declare<'a>(&'a self, _binding: &'a Binding) -> BusFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe<'a>(&'a self, binding: &'a Binding) -> BusFuture<'a, DeliveryStream> {
            Box::pin(async move {
                Err(BusError::SubscriptionFailed {
                    queue: binding.queue.clone(),
                    reason: "RecordingBus does not deliver".to_string(),
                })
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingBus, SequentialIds, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::bus::{MessageBus, Route};
    use booking_core::envelope::Envelope;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new("R");
        assert_eq!(ids.next_id(), "R1");
        assert_eq!(ids.clone().next_id(), "R2");
    }

    #[test]
    fn scripted_ids_replay_then_fall_back() {
        let ids = SequentialIds::scripted(&["A", "A"]);
        assert_eq!(ids.next_id(), "A");
        assert_eq!(ids.next_id(), "A");
        assert_eq!(ids.next_id(), "fallback-1");
    }

    #[tokio::test]
    async fn recording_bus_fails_then_records() {
        let bus = RecordingBus::new();
        bus.fail_next(1);

        let route = Route::direct("RENTAL_AGENT");
        let envelope = Envelope::empty("RequestBuildings");
        assert!(bus.publish(&route, &envelope).await.is_err());
        assert!(bus.publish(&route, &envelope).await.is_ok());

        assert_eq!(bus.published_kinds(), vec!["RequestBuildings"]);
        assert_eq!(bus.published_to(&Route::Fanout), Vec::<Envelope>::new());
    }
}
