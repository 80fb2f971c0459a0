//! # Booking Core
//!
//! Core traits and types shared by every room booking service.
//!
//! Each service (rental agent, building, building registry, client) is written
//! as a pure reducer over its own state. Reducers never perform I/O; they
//! return [`Effect`](effect::Effect) descriptions that the runtime executes,
//! most importantly publishing [`Envelope`](envelope::Envelope)s on a
//! [`MessageBus`](bus::MessageBus).
//!
//! ## Core Concepts
//!
//! - **State**: Owned data of one service instance
//! - **Action**: Every input a service reacts to (decoded messages and local commands)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies (bus handle, clock, id generator)
//!
//! ## Example
//!
//! ```ignore
//! use booking_core::{Reducer, effect::Effect, smallvec, SmallVec};
//!
//! impl Reducer for BuildingReducer {
//!     type State = BuildingState;
//!     type Action = BuildingAction;
//!     type Environment = BuildingEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut BuildingState,
//!         action: BuildingAction,
//!         env: &BuildingEnvironment,
//!     ) -> SmallVec<[Effect<BuildingAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Message bus abstraction (direct and fanout exchanges)
pub mod bus;

/// Message envelopes and typed protocol decoding
pub mod envelope;

/// Declarative macros for building effects
mod effect_macros;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most reducers return at most a handful of effects, so the
        /// result is stored inline for up to four of them.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and can be combined.
pub mod effect {
    use crate::bus::{BusError, MessageBus, Route};
    use crate::envelope::Envelope;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    /// Callback invoked with the result of a bus operation
    pub type Callback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially, each one finishing before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Message bus operation
        Publish(BusOperation<Action>),
    }

    /// Operations on the message bus
    pub enum BusOperation<Action> {
        /// Publish an envelope along a route
        Publish {
            /// Bus to publish on
            bus: Arc<dyn MessageBus>,
            /// Exchange and routing key
            route: Route,
            /// Message to deliver
            envelope: Envelope,
            /// Called after the broker accepted the message
            on_success: Callback<(), Action>,
            /// Called once retries are exhausted
            on_error: Callback<BusError, Action>,
        },
    }

    impl<Action> BusOperation<Action> {
        /// Route of the operation
        #[must_use]
        pub const fn route(&self) -> &Route {
            match self {
                Self::Publish { route, .. } => route,
            }
        }

        /// Envelope carried by the operation
        #[must_use]
        pub const fn envelope(&self) -> &Envelope {
            match self {
                Self::Publish { envelope, .. } => envelope,
            }
        }
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Publish(op) => f
                    .debug_struct("Effect::Publish")
                    .field("route", op.route())
                    .field("envelope", op.envelope())
                    .finish_non_exhaustive(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Every publish operation contained in this effect, depth first
        #[must_use]
        pub fn publications(&self) -> Vec<(&Route, &Envelope)> {
            match self {
                Effect::None | Effect::Future(_) => Vec::new(),
                Effect::Publish(op) => vec![(op.route(), op.envelope())],
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().flat_map(Effect::publications).collect()
                },
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of opaque identifiers (reservation numbers, correlation ids)
    ///
    /// Implementations must not hand out the same value twice within a process.
    pub trait IdGenerator: Send + Sync {
        /// Produce a fresh identifier
        fn next_id(&self) -> String;
    }
}

// Re-export the traits most services name directly
pub use reducer::Reducer;
