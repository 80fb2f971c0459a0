//! Rental agent.
//!
//! The only service that talks to both clients and buildings. It owns the
//! reservation table and a display copy of every building's availability,
//! built from `BuildingCreated` broadcasts and the outcomes it forwards.
//!
//! # Correlation
//!
//! Payloads carry no request id. When a room operation is forwarded to a
//! building the envelope is stamped with the reservation number and the
//! requester's destination; buildings echo that metadata on their reply. The
//! agent keeps one in-flight entry per forwarded operation and matches replies
//! on reservation number plus the operation the reply kind implies.

use crate::protocol::{
    BuildingAnnouncement, BuildingReply, MessageKind, ReservationRequest, RoomOperation,
    building_key, text_envelope,
};
use crate::reservations::ReservationBook;
use booking_core::bus::{MessageBus, Route};
use booking_core::environment::{Clock, IdGenerator};
use booking_core::envelope::{CORRELATION_ID, Envelope, EnvelopeError, Inbound, REPLY_TO, RESERVATION};
use booking_core::{Reducer, SmallVec, effect::Effect, publish, smallvec};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Attempts at drawing an unused reservation number before giving up
const MAX_NUMBER_ATTEMPTS: usize = 8;

// ============================================================================
// State
// ============================================================================

/// Display copy of one building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildingView {
    /// Sequential id
    pub id: u32,
    /// `Building-<id>`
    pub name: String,
    /// `(room name, booked)` in order
    pub rooms: Vec<(String, bool)>,
}

impl BuildingView {
    fn from_announcement(announcement: &BuildingAnnouncement) -> Self {
        Self {
            id: announcement.id,
            name: announcement.name.clone(),
            rooms: announcement.rooms.iter().map(|r| (r.clone(), false)).collect(),
        }
    }

    fn set_booked(&mut self, room: &str, booked: bool) {
        if let Some(entry) = self.rooms.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(room)) {
            entry.1 = booked;
        }
    }

    /// Listing lines: the name, then one line per room
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.rooms.iter().map(|(room, booked)| {
                format!("  {room}: {}", if *booked { "Booked" } else { "Available" })
            }))
            .collect()
    }
}

/// A room operation forwarded to a building and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlight {
    operation: RoomOperation,
    reply_to: String,
    correlation_id: Option<String>,
    building: u32,
    room: String,
}

/// Agent state.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    /// Known buildings by id
    pub buildings: BTreeMap<u32, BuildingView>,
    /// Reservation table
    pub reservations: ReservationBook,
    in_flight: HashMap<String, Vec<InFlight>>,
}

impl AgentState {
    /// Empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup by building name
    #[must_use]
    pub fn building_named(&self, name: &str) -> Option<&BuildingView> {
        self.buildings.values().find(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// Whether the display copy shows the room as booked
    #[must_use]
    pub fn is_booked(&self, building: &str, room: &str) -> bool {
        self.building_named(building).is_some_and(|b| {
            b.rooms
                .iter()
                .any(|(name, booked)| *booked && name.eq_ignore_ascii_case(room))
        })
    }

    /// Full listing, buildings in id order
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        self.buildings.values().flat_map(BuildingView::render).collect()
    }

    /// Number of room operations awaiting a building reply
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.values().map(Vec::len).sum()
    }

    fn take_in_flight(&mut self, number: &str, operation: Option<RoomOperation>) -> Option<InFlight> {
        let entries = self.in_flight.get_mut(number)?;
        let position = entries
            .iter()
            .position(|e| operation.is_none_or(|op| op == e.operation))?;
        let entry = entries.remove(position);
        if entries.is_empty() {
            self.in_flight.remove(number);
        }
        Some(entry)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Where a direct reply goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnAddress {
    /// Routing key of the requester
    pub destination: String,
    /// Echoed as `correlation_id` metadata
    pub correlation_id: Option<String>,
}

impl ReturnAddress {
    fn from_metadata(envelope: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            destination: envelope.require_metadata(REPLY_TO)?.to_string(),
            correlation_id: envelope.metadata_str(CORRELATION_ID).map(str::to_string),
        })
    }

    fn stamp(&self, envelope: Envelope) -> Envelope {
        match &self.correlation_id {
            Some(id) => envelope.with_metadata(CORRELATION_ID, id.clone()),
            None => envelope,
        }
    }
}

/// Agent actions.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// `RequestBuildings` from a client
    RequestBuildings {
        /// Where to send the listing
        reply: ReturnAddress,
    },
    /// `MakeReservation` from a client
    Reserve {
        /// Parsed payload
        request: ReservationRequest,
        /// Where to send the number and the outcome
        reply: ReturnAddress,
    },
    /// `CancelReservation` from a client
    Cancel {
        /// Reservation number
        number: String,
        /// Where to send the outcome
        reply: ReturnAddress,
    },
    /// Local command: broadcast `CreateBuilding`
    RegisterBuilding {
        /// Number of rooms
        rooms: usize,
    },
    /// Reply from a building
    BuildingOutcome {
        /// The outcome
        reply: BuildingReply,
        /// Metadata echoed by the building
        metadata: Option<Value>,
    },
    /// `BuildingCreated` broadcast
    BuildingCreated {
        /// The new building
        announcement: BuildingAnnouncement,
    },
}

impl Inbound for AgentAction {
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        if let Some(reply) = BuildingReply::from_envelope(envelope)? {
            return Ok(Some(Self::BuildingOutcome {
                reply,
                metadata: envelope.metadata.clone(),
            }));
        }

        let action = match MessageKind::of(envelope) {
            Some(MessageKind::RequestBuildings) => Self::RequestBuildings {
                reply: ReturnAddress::from_metadata(envelope)?,
            },
            Some(MessageKind::MakeReservation) => {
                let payload: String = envelope.decode()?;
                let request = ReservationRequest::parse(&payload).map_err(|reason| envelope.malformed(reason))?;
                let reply = match ReturnAddress::from_metadata(envelope) {
                    Ok(reply) => reply,
                    Err(_) => ReturnAddress {
                        destination: crate::protocol::client_key(&request.requester),
                        correlation_id: envelope.metadata_str(CORRELATION_ID).map(str::to_string),
                    },
                };
                Self::Reserve { request, reply }
            },
            Some(MessageKind::CancelReservation) => Self::Cancel {
                number: envelope.decode()?,
                reply: ReturnAddress::from_metadata(envelope)?,
            },
            Some(MessageKind::BuildingCreated) => Self::BuildingCreated {
                announcement: BuildingAnnouncement::from_envelope(envelope)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

// ============================================================================
// Environment & Reducer
// ============================================================================

/// Agent dependencies.
#[derive(Clone)]
pub struct AgentEnvironment {
    /// Shared bus handle
    pub bus: Arc<dyn MessageBus>,
    /// Stamps `created_at`
    pub clock: Arc<dyn Clock>,
    /// Reservation numbers
    pub ids: Arc<dyn IdGenerator>,
}

/// Agent reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentReducer;

impl AgentReducer {
    fn send(
        env: &AgentEnvironment,
        route: Route,
        envelope: Result<Envelope, EnvelopeError>,
    ) -> Effect<AgentAction> {
        match envelope {
            Ok(envelope) => publish!(env.bus, route, envelope),
            Err(error) => {
                tracing::error!(route = %route, error = %error, "Failed to encode message");
                Effect::None
            },
        }
    }

    fn reply(env: &AgentEnvironment, reply: &ReturnAddress, envelope: Result<Envelope, EnvelopeError>) -> Effect<AgentAction> {
        Self::send(
            env,
            Route::direct(reply.destination.clone()),
            envelope.map(|e| reply.stamp(e)),
        )
    }

    fn building_not_found(env: &AgentEnvironment, reply: &ReturnAddress, building: &str) -> Effect<AgentAction> {
        tracing::debug!(building, "Unknown building");
        Self::reply(
            env,
            reply,
            text_envelope(
                MessageKind::BuildingNotFound,
                &format!("The building {building} does not exist."),
            ),
        )
    }

    fn issue_number(state: &AgentState, env: &AgentEnvironment) -> Option<String> {
        (0..MAX_NUMBER_ATTEMPTS)
            .map(|_| env.ids.next_id())
            .find(|n| !state.reservations.was_issued(n))
    }

    fn reserve(
        state: &mut AgentState,
        request: ReservationRequest,
        reply: &ReturnAddress,
        env: &AgentEnvironment,
    ) -> SmallVec<[Effect<AgentAction>; 4]> {
        let Some(building) = state.building_named(&request.building) else {
            return smallvec![Self::building_not_found(env, reply, &request.building)];
        };
        let (building_id, building_name) = (building.id, building.name.clone());

        let Some(number) = Self::issue_number(state, env) else {
            tracing::error!(attempts = MAX_NUMBER_ATTEMPTS, "Could not draw an unused reservation number");
            return smallvec![Effect::None];
        };
        if let Err(error) = state.reservations.open(
            number.clone(),
            request.requester.clone(),
            building_name,
            request.room.clone(),
            env.clock.now(),
        ) {
            tracing::error!(error = %error, "Reservation not opened");
            return smallvec![Effect::None];
        }

        state.in_flight.entry(number.clone()).or_default().push(InFlight {
            operation: RoomOperation::Reserve,
            reply_to: reply.destination.clone(),
            correlation_id: reply.correlation_id.clone(),
            building: building_id,
            room: request.room.clone(),
        });
        tracing::info!(reservation = %number, building = building_id, room = %request.room, "Reservation opened");
        metrics::counter!("rental_reservations_total", "event" => "opened").increment(1);

        let forward = text_envelope(MessageKind::MakeReservation, &request.room).map(|e| {
            e.with_metadata(RESERVATION, number.clone())
                .with_metadata(REPLY_TO, reply.destination.clone())
        });
        smallvec![Effect::chain(vec![
            Self::send(env, Route::direct(building_key(building_id)), forward),
            Self::reply(env, reply, text_envelope(MessageKind::ReservationNumber, &number)),
        ])]
    }

    fn cancel(
        state: &mut AgentState,
        number: &str,
        reply: &ReturnAddress,
        env: &AgentEnvironment,
    ) -> SmallVec<[Effect<AgentAction>; 4]> {
        let Some(reservation) = state.reservations.get(number) else {
            return smallvec![Self::reply(
                env,
                reply,
                text_envelope(
                    MessageKind::ReservationNotFound,
                    &format!("Reservation {number} cannot be found in the system."),
                ),
            )];
        };
        let Some(building_id) = state.building_named(&reservation.building).map(|b| b.id) else {
            let building = reservation.building.clone();
            return smallvec![Self::building_not_found(env, reply, &building)];
        };

        let Some(cancelled) = state.reservations.cancel(number) else {
            return smallvec![Effect::None];
        };
        state.in_flight.entry(number.to_string()).or_default().push(InFlight {
            operation: RoomOperation::Cancel,
            reply_to: reply.destination.clone(),
            correlation_id: reply.correlation_id.clone(),
            building: building_id,
            room: cancelled.room.clone(),
        });
        tracing::info!(reservation = %number, building = building_id, "Reservation cancelled");
        metrics::counter!("rental_reservations_total", "event" => "cancelled").increment(1);

        let forward = text_envelope(MessageKind::CancelReservation, &cancelled.room).map(|e| {
            e.with_metadata(RESERVATION, number)
                .with_metadata(REPLY_TO, reply.destination.clone())
        });
        smallvec![Self::send(env, Route::direct(building_key(building_id)), forward)]
    }

    fn outcome(
        state: &mut AgentState,
        reply: &BuildingReply,
        metadata: Option<Value>,
        env: &AgentEnvironment,
    ) -> SmallVec<[Effect<AgentAction>; 4]> {
        let echoed = Envelope::empty(reply.kind().as_str()).with_metadata_from(metadata);
        let Some(number) = echoed.metadata_str(RESERVATION).map(str::to_string) else {
            tracing::warn!(kind = %reply.kind(), "Dropped building outcome without a reservation number");
            return smallvec![Effect::None];
        };

        let entry = state.take_in_flight(&number, reply.operation());
        if let Some(entry) = &entry {
            match (reply, entry.operation) {
                (BuildingReply::Confirmed(_), RoomOperation::Reserve) => {
                    state.reservations.confirm(&number);
                    metrics::counter!("rental_reservations_total", "event" => "confirmed").increment(1);
                    if let Some(view) = state.buildings.get_mut(&entry.building) {
                        view.set_booked(&entry.room, true);
                    }
                },
                (BuildingReply::Cancelled(_), RoomOperation::Cancel) => {
                    if let Some(view) = state.buildings.get_mut(&entry.building) {
                        view.set_booked(&entry.room, false);
                    }
                },
                // AlreadyBooked and RoomNotFound leave the reservation Pending
                _ => {},
            }
        }

        let (destination, correlation_id) = match entry {
            Some(entry) => (entry.reply_to, entry.correlation_id),
            None => match echoed.metadata_str(REPLY_TO) {
                Some(reply_to) => {
                    tracing::debug!(reservation = %number, "Forwarding outcome with no in-flight entry");
                    (reply_to.to_string(), None)
                },
                None => {
                    tracing::warn!(reservation = %number, "Dropped building outcome with no destination");
                    return smallvec![Effect::None];
                },
            },
        };

        let forward = reply.to_envelope().map(|e| e.with_metadata(RESERVATION, number));
        let address = ReturnAddress {
            destination,
            correlation_id,
        };
        smallvec![Self::reply(env, &address, forward)]
    }
}

impl Reducer for AgentReducer {
    type State = AgentState;
    type Action = AgentAction;
    type Environment = AgentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            AgentAction::RequestBuildings { reply } => {
                let listing = state.listing();
                smallvec![Self::reply(
                    env,
                    &reply,
                    Envelope::encode(MessageKind::ResponseBuildings.as_str(), &listing),
                )]
            },
            AgentAction::Reserve { request, reply } => Self::reserve(state, request, &reply, env),
            AgentAction::Cancel { number, reply } => Self::cancel(state, &number, &reply, env),
            AgentAction::RegisterBuilding { rooms } => {
                tracing::info!(rooms, "Requesting a new building");
                smallvec![Self::send(
                    env,
                    Route::Fanout,
                    text_envelope(MessageKind::CreateBuilding, &rooms.to_string()),
                )]
            },
            AgentAction::BuildingOutcome { reply, metadata } => Self::outcome(state, &reply, metadata, env),
            AgentAction::BuildingCreated { announcement } => {
                state
                    .buildings
                    .entry(announcement.id)
                    .or_insert_with(|| BuildingView::from_announcement(&announcement));
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_testing::mocks::SequentialIds;
    use booking_testing::{RecordingBus, ReducerTest, assertions, test_clock};

    fn env() -> AgentEnvironment {
        AgentEnvironment {
            bus: Arc::new(RecordingBus::new()),
            clock: Arc::new(test_clock()),
            ids: Arc::new(SequentialIds::new("R")),
        }
    }

    fn alice() -> ReturnAddress {
        ReturnAddress {
            destination: "CLIENT_KEYalice".to_string(),
            correlation_id: Some("c-1".to_string()),
        }
    }

    fn with_building(rooms: usize) -> AgentState {
        let mut state = AgentState::new();
        let announcement = BuildingAnnouncement::new(1, rooms);
        state.buildings.insert(1, BuildingView::from_announcement(&announcement));
        state
    }

    fn reserve(building: &str, room: &str) -> AgentAction {
        AgentAction::Reserve {
            request: ReservationRequest {
                requester: "alice".to_string(),
                building: building.to_string(),
                room: room.to_string(),
            },
            reply: alice(),
        }
    }

    fn outcome(reply: BuildingReply, number: &str) -> AgentAction {
        AgentAction::BuildingOutcome {
            reply,
            metadata: Envelope::empty("X")
                .with_metadata(RESERVATION, number)
                .with_metadata(REPLY_TO, "CLIENT_KEYalice")
                .metadata,
        }
    }

    /// State after reserving Room-1 of Building-1 as `R1`
    fn reserved() -> AgentState {
        let mut state = with_building(2);
        let _ = AgentReducer.reduce(&mut state, reserve("building-1", "room-1"), &env());
        state
    }

    #[test]
    fn listing_renders_each_room() {
        let state = with_building(2);
        assert_eq!(
            state.listing(),
            vec!["Building-1", "  Room-1: Available", "  Room-2: Available"]
        );
    }

    #[test]
    fn request_buildings_replies_with_listing() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(with_building(1))
            .when_action(AgentAction::RequestBuildings { reply: alice() })
            .then_effects(|effects| {
                let (route, envelope) = &assertions::published(effects)[0];
                assert_eq!(route, &Route::direct("CLIENT_KEYalice"));
                assert_eq!(envelope.metadata_str(CORRELATION_ID), Some("c-1"));
                let listing: Vec<String> = envelope.decode().unwrap();
                assert_eq!(listing, vec!["Building-1", "  Room-1: Available"]);
            })
            .run();
    }

    #[test]
    fn reserve_forwards_then_replies_with_number() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(with_building(2))
            .when_action(reserve("BUILDING-1", "room-1"))
            .then_state(|state| {
                let reservation = state.reservations.get("R1").unwrap();
                assert_eq!(reservation.building, "Building-1");
                assert_eq!(reservation.status, crate::reservations::ReservationStatus::Pending);
                assert_eq!(state.in_flight(), 1);
            })
            .then_effects(|effects| {
                let published = assertions::published(effects);
                assert_eq!(published.len(), 2);

                let (route, forward) = &published[0];
                assert_eq!(route, &Route::direct("BUILDING_KEY1"));
                assert_eq!(forward.kind, "MakeReservation");
                assert_eq!(forward.decode::<String>().unwrap(), "room-1");
                assert_eq!(forward.metadata_str(RESERVATION), Some("R1"));
                assert_eq!(forward.metadata_str(REPLY_TO), Some("CLIENT_KEYalice"));

                let (route, number) = &published[1];
                assert_eq!(route, &Route::direct("CLIENT_KEYalice"));
                assert_eq!(number.kind, "ReservationNumber");
                assert_eq!(number.decode::<String>().unwrap(), "R1");
            })
            .run();
    }

    #[test]
    fn reserve_unknown_building_creates_nothing() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(with_building(2))
            .when_action(reserve("building-9", "room-1"))
            .then_state(|state| {
                assert!(state.reservations.is_empty());
                assert_eq!(state.in_flight(), 0);
            })
            .then_effects(|effects| {
                let (_, envelope) = &assertions::published(effects)[0];
                assert_eq!(envelope.kind, "BuildingNotFound");
                assert_eq!(
                    envelope.decode::<String>().unwrap(),
                    "The building building-9 does not exist."
                );
            })
            .run();
    }

    #[test]
    fn reserve_skips_numbers_already_issued() {
        let env = AgentEnvironment {
            ids: Arc::new(SequentialIds::scripted(&["R1", "R1", "R2"])),
            ..env()
        };
        let mut state = with_building(2);
        let _ = AgentReducer.reduce(&mut state, reserve("building-1", "room-1"), &env);
        let _ = AgentReducer.reduce(&mut state, reserve("building-1", "room-2"), &env);

        assert_eq!(state.reservations.len(), 2);
        assert_eq!(state.reservations.get("R2").map(|r| r.room.as_str()), Some("room-2"));
    }

    #[test]
    fn confirmed_outcome_confirms_and_forwards() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(reserved())
            .when_action(outcome(
                BuildingReply::Confirmed("The reservation is confirmed for Building-1 Room-1".to_string()),
                "R1",
            ))
            .then_state(|state| {
                assert_eq!(
                    state.reservations.get("R1").map(|r| r.status),
                    Some(crate::reservations::ReservationStatus::Confirmed)
                );
                assert!(state.is_booked("Building-1", "Room-1"));
                assert_eq!(state.in_flight(), 0);
            })
            .then_effects(|effects| {
                let (route, envelope) = &assertions::published(effects)[0];
                assert_eq!(route, &Route::direct("CLIENT_KEYalice"));
                assert_eq!(envelope.kind, "ConfirmReservation");
                assert_eq!(envelope.metadata_str(RESERVATION), Some("R1"));
                assert_eq!(envelope.metadata_str(CORRELATION_ID), Some("c-1"));
            })
            .run();
    }

    #[test]
    fn already_booked_leaves_reservation_pending() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(reserved())
            .when_action(outcome(
                BuildingReply::AlreadyBooked("This room is already booked.".to_string()),
                "R1",
            ))
            .then_state(|state| {
                assert_eq!(
                    state.reservations.get("R1").map(|r| r.status),
                    Some(crate::reservations::ReservationStatus::Pending)
                );
                assert!(!state.is_booked("Building-1", "Room-1"));
            })
            .then_effects(|effects| {
                assert_eq!(assertions::published_kinds(effects), vec!["AlreadyBooked"]);
            })
            .run();
    }

    #[test]
    fn cancel_unknown_number_publishes_only_to_requester() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(with_building(2))
            .when_action(AgentAction::Cancel {
                number: "nope".to_string(),
                reply: alice(),
            })
            .then_effects(|effects| {
                let published = assertions::published(effects);
                assert_eq!(published.len(), 1);
                assert_eq!(published[0].0, Route::direct("CLIENT_KEYalice"));
                assert_eq!(published[0].1.kind, "ReservationNotFound");
                assert_eq!(
                    published[0].1.decode::<String>().unwrap(),
                    "Reservation nope cannot be found in the system."
                );
            })
            .run();
    }

    #[test]
    fn cancel_for_a_vanished_building_keeps_the_reservation() {
        let mut state = reserved();
        state.buildings.clear();

        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(state)
            .when_action(AgentAction::Cancel {
                number: "R1".to_string(),
                reply: alice(),
            })
            .then_state(|state| {
                assert!(state.reservations.get("R1").is_some());
                // Only the original reserve is still waiting on a building
                assert_eq!(state.in_flight(), 1);
            })
            .then_effects(|effects| {
                let published = assertions::published(effects);
                assert_eq!(published.len(), 1);
                let (route, envelope) = &published[0];
                assert_eq!(route, &Route::direct("CLIENT_KEYalice"));
                assert_eq!(envelope.kind, "BuildingNotFound");
                assert_eq!(
                    envelope.decode::<String>().unwrap(),
                    "The building Building-1 does not exist."
                );
                assert!(!published.iter().any(
                    |(route, _)| matches!(route, Route::Direct { key } if key.starts_with("BUILDING_KEY"))
                ));
            })
            .run();
    }

    #[test]
    fn cancel_removes_before_building_confirms() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(reserved())
            .when_action(AgentAction::Cancel {
                number: "R1".to_string(),
                reply: alice(),
            })
            .then_state(|state| {
                assert!(state.reservations.get("R1").is_none());
                assert!(state.reservations.was_issued("R1"));
                // The reserve and the cancel are both awaiting their reply
                assert_eq!(state.in_flight(), 2);
            })
            .then_effects(|effects| {
                let (route, envelope) = &assertions::published(effects)[0];
                assert_eq!(route, &Route::direct("BUILDING_KEY1"));
                assert_eq!(envelope.kind, "CancelReservation");
                assert_eq!(envelope.decode::<String>().unwrap(), "room-1");
            })
            .run();
    }

    #[test]
    fn cancelled_outcome_frees_display_room() {
        let mut state = reserved();
        let env = env();
        let _ = AgentReducer.reduce(
            &mut state,
            outcome(BuildingReply::Confirmed("ok".to_string()), "R1"),
            &env,
        );
        let _ = AgentReducer.reduce(
            &mut state,
            AgentAction::Cancel {
                number: "R1".to_string(),
                reply: alice(),
            },
            &env,
        );
        let effects = AgentReducer.reduce(
            &mut state,
            outcome(BuildingReply::Cancelled("Reservation cancelled for Room-1".to_string()), "R1"),
            &env,
        );

        assert!(!state.is_booked("Building-1", "Room-1"));
        assert_eq!(state.in_flight(), 0);
        assert_eq!(assertions::published_kinds(&effects), vec!["ReservationCancelled"]);
    }

    #[test]
    fn outcome_without_destination_is_dropped() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(with_building(1))
            .when_action(AgentAction::BuildingOutcome {
                reply: BuildingReply::Confirmed("ok".to_string()),
                metadata: Envelope::empty("X").with_metadata(RESERVATION, "R9").metadata,
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn register_building_broadcasts_room_count() {
        ReducerTest::new(AgentReducer)
            .with_env(env())
            .given_state(AgentState::new())
            .when_action(AgentAction::RegisterBuilding { rooms: 3 })
            .then_state(|state| assert!(state.buildings.is_empty()))
            .then_effects(|effects| {
                let (route, envelope) = &assertions::published(effects)[0];
                assert_eq!(route, &Route::Fanout);
                assert_eq!(envelope.kind, "CreateBuilding");
                assert_eq!(envelope.decode::<String>().unwrap(), "3");
            })
            .run();
    }

    #[test]
    fn building_created_is_idempotent() {
        let mut state = AgentState::new();
        let announcement = BuildingAnnouncement::new(1, 2);
        for _ in 0..2 {
            let _ = AgentReducer.reduce(
                &mut state,
                AgentAction::BuildingCreated {
                    announcement: announcement.clone(),
                },
                &env(),
            );
        }
        assert_eq!(state.buildings.len(), 1);
        assert_eq!(state.listing().len(), 3);
    }

    #[test]
    fn inbox_falls_back_to_requester_key() {
        let envelope = text_envelope(MessageKind::MakeReservation, "bob,building-1,room-1").unwrap();
        let action = AgentAction::from_envelope(&envelope).unwrap();
        assert!(matches!(
            action,
            Some(AgentAction::Reserve { reply, .. }) if reply.destination == "CLIENT_KEYbob"
        ));

        let malformed = text_envelope(MessageKind::MakeReservation, "bob,building-1").unwrap();
        assert!(AgentAction::from_envelope(&malformed).is_err());

        let cancel_without_reply_to = text_envelope(MessageKind::CancelReservation, "R1").unwrap();
        assert!(matches!(
            AgentAction::from_envelope(&cancel_without_reply_to),
            Err(EnvelopeError::MissingMetadata { key: REPLY_TO, .. })
        ));

        let create = text_envelope(MessageKind::CreateBuilding, "2").unwrap();
        assert_eq!(AgentAction::from_envelope(&create), Ok(None));
    }
}
