//! Building registry.
//!
//! Listens on the fanout exchange only. A `CreateBuilding` broadcast gets the
//! next sequential id, a supervised building worker is started for it, and the
//! registry broadcasts `BuildingCreated` once the worker is running.

use crate::error::ServiceError;
use crate::protocol::{BuildingAnnouncement, MessageKind};
use async_trait::async_trait;
use booking_core::bus::{MessageBus, Route};
use booking_core::envelope::{Envelope, EnvelopeError, Inbound};
use booking_core::{Reducer, SmallVec, async_effect, effect::Effect, publish, smallvec};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a building worker is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildingSetup {
    /// Sequential id
    pub id: u32,
    /// Number of rooms
    pub rooms: usize,
}

/// Starts building workers.
#[async_trait]
pub trait BuildingSupervisor: Send + Sync {
    /// Start (and keep supervising) the worker for `setup`.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] when the worker could not be started.
    async fn start(&self, setup: BuildingSetup) -> Result<(), ServiceError>;
}

/// Registry state.
#[derive(Debug, Clone)]
pub struct RegistryState {
    next_id: u32,
    /// Running buildings by id
    pub buildings: BTreeMap<u32, BuildingSetup>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 1,
            buildings: BTreeMap::new(),
        }
    }
}

impl RegistryState {
    /// Id the next building will get
    #[must_use]
    pub const fn next_id(&self) -> u32 {
        self.next_id
    }
}

/// Registry actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAction {
    /// `CreateBuilding` broadcast
    CreateBuilding {
        /// Number of rooms
        rooms: usize,
    },
    /// The worker for a building is running
    Started {
        /// The started building
        setup: BuildingSetup,
    },
    /// The worker could not be started
    StartFailed {
        /// Building id (not reused)
        id: u32,
        /// Why
        reason: String,
    },
}

impl Inbound for RegistryAction {
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        if MessageKind::of(envelope) != Some(MessageKind::CreateBuilding) {
            return Ok(None);
        }

        let count: String = envelope.decode()?;
        let rooms = count.trim().parse::<usize>().map_err(|_| {
            envelope.malformed(format!("room count '{count}' is not a non-negative integer"))
        })?;
        Ok(Some(Self::CreateBuilding { rooms }))
    }
}

/// Registry dependencies.
#[derive(Clone)]
pub struct RegistryEnvironment {
    /// Shared bus handle
    pub bus: Arc<dyn MessageBus>,
    /// Worker supervisor
    pub supervisor: Arc<dyn BuildingSupervisor>,
}

/// Registry reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryReducer;

impl Reducer for RegistryReducer {
    type State = RegistryState;
    type Action = RegistryAction;
    type Environment = RegistryEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RegistryAction::CreateBuilding { rooms } => {
                let setup = BuildingSetup {
                    id: state.next_id,
                    rooms,
                };
                state.next_id += 1;
                tracing::info!(building = setup.id, rooms, "Starting building");

                let supervisor = Arc::clone(&env.supervisor);
                smallvec![async_effect! {
                    match supervisor.start(setup).await {
                        Ok(()) => Some(RegistryAction::Started { setup }),
                        Err(e) => Some(RegistryAction::StartFailed {
                            id: setup.id,
                            reason: e.to_string(),
                        }),
                    }
                }]
            },
            RegistryAction::Started { setup } => {
                state.buildings.insert(setup.id, setup);
                let announcement = BuildingAnnouncement::new(setup.id, setup.rooms);
                tracing::info!(building = setup.id, "{announcement}");

                match announcement.to_envelope() {
                    Ok(envelope) => smallvec![publish!(env.bus, Route::Fanout, envelope)],
                    Err(error) => {
                        tracing::error!(building = setup.id, error = %error, "Failed to encode announcement");
                        smallvec![Effect::None]
                    },
                }
            },
            RegistryAction::StartFailed { id, reason } => {
                tracing::error!(building = id, reason = %reason, "Building worker failed to start");
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_testing::{RecordingBus, ReducerTest, assertions};

    struct NoopSupervisor;

    #[async_trait]
    impl BuildingSupervisor for NoopSupervisor {
        async fn start(&self, _setup: BuildingSetup) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn env() -> RegistryEnvironment {
        RegistryEnvironment {
            bus: Arc::new(RecordingBus::new()),
            supervisor: Arc::new(NoopSupervisor),
        }
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let mut state = RegistryState::default();
        let _ = RegistryReducer.reduce(&mut state, RegistryAction::CreateBuilding { rooms: 3 }, &env());
        let _ = RegistryReducer.reduce(&mut state, RegistryAction::CreateBuilding { rooms: 5 }, &env());
        assert_eq!(state.next_id(), 3);
    }

    #[test]
    fn create_starts_worker_without_announcing() {
        ReducerTest::new(RegistryReducer)
            .with_env(env())
            .given_state(RegistryState::default())
            .when_action(RegistryAction::CreateBuilding { rooms: 2 })
            .then_state(|state| {
                assert_eq!(state.next_id(), 2);
                assert!(state.buildings.is_empty());
            })
            .then_effects(|effects| {
                assertions::assert_has_future_effect(effects);
                assert!(assertions::published_kinds(effects).is_empty());
            })
            .run();
    }

    #[test]
    fn started_building_is_announced() {
        ReducerTest::new(RegistryReducer)
            .with_env(env())
            .given_state(RegistryState::default())
            .when_action(RegistryAction::Started {
                setup: BuildingSetup { id: 1, rooms: 2 },
            })
            .then_state(|state| assert!(state.buildings.contains_key(&1)))
            .then_effects(|effects| {
                let (route, envelope) = &assertions::published(effects)[0];
                assert_eq!(route, &Route::Fanout);
                let announcement = BuildingAnnouncement::from_envelope(envelope).unwrap();
                assert_eq!(announcement, BuildingAnnouncement::new(1, 2));
                assert_eq!(announcement.announcement, "Building-1 is created!");
            })
            .run();
    }

    #[test]
    fn failed_start_publishes_nothing() {
        ReducerTest::new(RegistryReducer)
            .with_env(env())
            .given_state(RegistryState::default())
            .when_action(RegistryAction::StartFailed {
                id: 1,
                reason: "boom".to_string(),
            })
            .then_state(|state| assert_eq!(state.next_id(), 1))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn inbox_parses_room_count() {
        let envelope = Envelope::encode("CreateBuilding", "3").unwrap();
        assert_eq!(
            RegistryAction::from_envelope(&envelope),
            Ok(Some(RegistryAction::CreateBuilding { rooms: 3 }))
        );

        let negative = Envelope::encode("CreateBuilding", "-1").unwrap();
        assert!(matches!(
            RegistryAction::from_envelope(&negative),
            Err(EnvelopeError::Malformed { .. })
        ));

        let announcement = BuildingAnnouncement::new(1, 1).to_envelope().unwrap();
        assert_eq!(RegistryAction::from_envelope(&announcement), Ok(None));
    }
}
