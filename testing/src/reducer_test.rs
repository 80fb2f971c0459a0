//! Given-When-Then harness for reducers.
//!
//! A reducer is a plain function of `(state, action, environment)`, so a test
//! only needs to build those three values, run the reducer once and inspect
//! what came out. Setup actions can be replayed first with
//! [`ReducerTest::given_actions`]; their effects are discarded.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use booking_core::{effect::Effect, reducer::Reducer};

/// One check run after the action under test, in declaration order.
enum Expectation<S, A> {
    State(Box<dyn FnOnce(&S)>),
    Effects(Box<dyn FnOnce(&[Effect<A>])>),
}

/// Builder that runs one action through a reducer and checks the outcome.
///
/// # Example
///
/// ```ignore
/// use booking_testing::{ReducerTest, assertions};
///
/// ReducerTest::new(BuildingReducer)
///     .with_env(BuildingEnvironment::new(bus))
///     .given_state(BuildingState::new(1, 2))
///     .when_action(BuildingAction::Reserve { room: "room-1".into(), metadata: None })
///     .then_state(|state| assert!(state.is_booked("Room-1")))
///     .then_publishes(&["ConfirmReservation"])
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    state: Option<S>,
    setup: Vec<A>,
    action: Option<A>,
    expectations: Vec<Expectation<S, A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Harness around `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            state: None,
            setup: Vec::new(),
            action: None,
            expectations: Vec::new(),
        }
    }

    /// Environment handed to the reducer
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Starting state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.state = Some(state);
        self
    }

    /// Actions applied to the starting state before the one under test
    #[must_use]
    pub fn given_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.setup.extend(actions);
        self
    }

    /// The action under test (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Check the state after the action (Then)
    #[must_use]
    pub fn then_state<F>(mut self, check: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.expectations.push(Expectation::State(Box::new(check)));
        self
    }

    /// Check the effects returned for the action (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, check: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.expectations.push(Expectation::Effects(Box::new(check)));
        self
    }

    /// Expect exactly these envelope kinds to be published, depth first
    #[must_use]
    pub fn then_publishes(self, kinds: &[&str]) -> Self {
        let expected: Vec<String> = kinds.iter().map(|k| (*k).to_string()).collect();
        self.then_effects(move |effects| {
            assert_eq!(assertions::published_kinds(effects), expected);
        })
    }

    /// Replay the setup, run the action and every check.
    ///
    /// # Panics
    ///
    /// Panics when the state, action or environment is missing, or when a
    /// check fails.
    #[allow(clippy::expect_used)] // Harness misuse is a test bug
    pub fn run(self) {
        let env = self.environment.expect("call with_env() before run()");
        let mut state = self.state.expect("call given_state() before run()");
        let action = self.action.expect("call when_action() before run()");

        for earlier in self.setup {
            let _ = self.reducer.reduce(&mut state, earlier, &env);
        }
        let effects = self.reducer.reduce(&mut state, action, &env);

        for expectation in self.expectations {
            match expectation {
                Expectation::State(check) => check(&state),
                Expectation::Effects(check) => check(&effects),
            }
        }
    }
}

/// Assertions over returned effects.
pub mod assertions {
    use booking_core::bus::Route;
    use booking_core::effect::Effect;
    use booking_core::envelope::Envelope;

    /// Nothing to execute: no effects, or a lone `Effect::None`
    ///
    /// # Panics
    ///
    /// Panics if any effect would do work.
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            matches!(effects, [] | [Effect::None]),
            "expected no effects, got {effects:?}"
        );
    }

    /// At least one effect feeds an action back
    ///
    /// # Panics
    ///
    /// Panics if there is no `Effect::Future`.
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "expected an async effect"
        );
    }

    /// At least one envelope is published, at any nesting depth
    ///
    /// # Panics
    ///
    /// Panics if nothing is published.
    pub fn assert_has_publish_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| !e.publications().is_empty()),
            "expected a publish"
        );
    }

    /// Kinds of every published envelope, depth first
    #[must_use]
    pub fn published_kinds<A>(effects: &[Effect<A>]) -> Vec<String> {
        effects
            .iter()
            .flat_map(Effect::publications)
            .map(|(_, envelope)| envelope.kind.clone())
            .collect()
    }

    /// Every `(route, envelope)` pair published, depth first
    #[must_use]
    pub fn published<A>(effects: &[Effect<A>]) -> Vec<(Route, Envelope)> {
        effects
            .iter()
            .flat_map(Effect::publications)
            .map(|(route, envelope)| (route.clone(), envelope.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingBus;
    use booking_core::bus::{MessageBus, Route};
    use booking_core::envelope::Envelope;
    use booking_core::{SmallVec, publish, smallvec};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// One front desk booking rooms by name
    #[derive(Clone, Debug, Default)]
    struct DeskState {
        booked: BTreeSet<String>,
    }

    #[derive(Clone, Debug)]
    enum DeskAction {
        Book(String),
        Release(String),
    }

    struct DeskEnv {
        bus: Arc<dyn MessageBus>,
    }

    struct DeskReducer;

    impl Reducer for DeskReducer {
        type State = DeskState;
        type Action = DeskAction;
        type Environment = DeskEnv;

        fn reduce(
            &self,
            state: &mut DeskState,
            action: DeskAction,
            env: &DeskEnv,
        ) -> SmallVec<[Effect<DeskAction>; 4]> {
            match action {
                DeskAction::Book(room) => {
                    let kind = if state.booked.insert(room) {
                        "ConfirmReservation"
                    } else {
                        "AlreadyBooked"
                    };
                    smallvec![publish!(env.bus, Route::direct("RENTAL_AGENT"), Envelope::empty(kind))]
                },
                DeskAction::Release(room) => {
                    state.booked.remove(&room);
                    smallvec![Effect::None]
                },
            }
        }
    }

    fn desk() -> DeskEnv {
        DeskEnv {
            bus: Arc::new(RecordingBus::new()),
        }
    }

    #[test]
    fn booking_a_free_room_confirms() {
        ReducerTest::new(DeskReducer)
            .with_env(desk())
            .given_state(DeskState::default())
            .when_action(DeskAction::Book("Room-1".to_string()))
            .then_state(|state| assert!(state.booked.contains("Room-1")))
            .then_effects(assertions::assert_has_publish_effect)
            .then_publishes(&["ConfirmReservation"])
            .run();
    }

    #[test]
    fn setup_actions_are_replayed_first() {
        ReducerTest::new(DeskReducer)
            .with_env(desk())
            .given_state(DeskState::default())
            .given_actions([DeskAction::Book("Room-1".to_string())])
            .when_action(DeskAction::Book("Room-1".to_string()))
            .then_state(|state| assert_eq!(state.booked.len(), 1))
            .then_publishes(&["AlreadyBooked"])
            .run();
    }

    #[test]
    fn releasing_has_no_effects() {
        ReducerTest::new(DeskReducer)
            .with_env(desk())
            .given_state(DeskState::default())
            .given_actions([DeskAction::Book("Room-2".to_string())])
            .when_action(DeskAction::Release("Room-2".to_string()))
            .then_state(|state| assert!(state.booked.is_empty()))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn nested_publishes_are_found() {
        let bus: Arc<dyn MessageBus> = Arc::new(RecordingBus::new());
        let effects: Vec<Effect<DeskAction>> = vec![Effect::chain(vec![
            publish!(bus, Route::direct("BUILDING_KEY1"), Envelope::empty("MakeReservation")),
            Effect::merge(vec![publish!(bus, Route::Fanout, Envelope::empty("BuildingCreated"))]),
        ])];

        assert_eq!(
            assertions::published_kinds(&effects),
            vec!["MakeReservation", "BuildingCreated"]
        );
        assert_eq!(assertions::published(&effects)[1].0, Route::Fanout);
    }

    #[test]
    #[should_panic(expected = "expected no effects")]
    fn a_publish_is_not_silence() {
        ReducerTest::new(DeskReducer)
            .with_env(desk())
            .given_state(DeskState::default())
            .when_action(DeskAction::Book("Room-3".to_string()))
            .then_effects(assertions::assert_no_effects)
            .run();
    }
}
