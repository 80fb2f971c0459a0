//! Building service.
//!
//! One instance per building, consuming `BUILDING_KEY<id>`. It owns the
//! booking state of its rooms and answers every request to the rental agent.
//!
//! ```text
//!          book                  unbook
//!   Free ────────▶ Booked ──────────────▶ Free
//! ```

use crate::protocol::{BuildingReply, MessageKind, RENTAL_AGENT_KEY, building_key, building_name, room_name};
use booking_core::bus::{MessageBus, Route};
use booking_core::envelope::{Envelope, EnvelopeError, Inbound, ORIGIN};
use booking_core::{Reducer, SmallVec, effect::Effect, publish, smallvec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// State
// ============================================================================

/// A room and whether it is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// `Room-<n>`
    pub name: String,
    /// Booked flag
    pub booked: bool,
}

/// Booking state of one building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingState {
    /// Sequential id
    pub id: u32,
    /// `Building-<id>`
    pub name: String,
    /// Rooms in order
    pub rooms: Vec<Room>,
}

impl BuildingState {
    /// Building with `room_count` free rooms.
    #[must_use]
    pub fn new(id: u32, room_count: usize) -> Self {
        Self {
            id,
            name: building_name(id),
            rooms: (1..=room_count)
                .map(|n| Room {
                    name: room_name(n),
                    booked: false,
                })
                .collect(),
        }
    }

    /// Case-insensitive room lookup
    #[must_use]
    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    fn room_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Whether the room exists and is booked
    #[must_use]
    pub fn is_booked(&self, name: &str) -> bool {
        self.room(name).is_some_and(|r| r.booked)
    }

    /// Names of booked rooms
    #[must_use]
    pub fn booked_rooms(&self) -> Vec<&str> {
        self.rooms
            .iter()
            .filter(|r| r.booked)
            .map(|r| r.name.as_str())
            .collect()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Requests a building accepts.
///
/// `metadata` is the routing metadata of the request, copied onto the reply.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildingAction {
    /// Book a room
    Reserve {
        /// Room name as sent by the agent
        room: String,
        /// Request metadata
        metadata: Option<Value>,
    },
    /// Release a room
    Cancel {
        /// Room name as sent by the agent
        room: String,
        /// Request metadata
        metadata: Option<Value>,
    },
}

impl Inbound for BuildingAction {
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        let metadata = envelope.metadata.clone();
        let action = match MessageKind::of(envelope) {
            Some(MessageKind::MakeReservation) => Self::Reserve {
                room: envelope.decode()?,
                metadata,
            },
            Some(MessageKind::CancelReservation) => Self::Cancel {
                room: envelope.decode()?,
                metadata,
            },
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

// ============================================================================
// Environment & Reducer
// ============================================================================

/// Dependencies of a building service.
#[derive(Clone)]
pub struct BuildingEnvironment {
    /// Shared bus handle
    pub bus: Arc<dyn MessageBus>,
}

impl BuildingEnvironment {
    /// Environment over a bus
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }
}

/// Reducer of one building.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildingReducer;

impl BuildingReducer {
    fn reserve(state: &mut BuildingState, room: &str) -> BuildingReply {
        let building = state.name.clone();
        match state.room_mut(room) {
            None => BuildingReply::RoomNotFound("This room does not exist.".to_string()),
            Some(room) if room.booked => {
                BuildingReply::AlreadyBooked("This room is already booked.".to_string())
            },
            Some(room) => {
                room.booked = true;
                BuildingReply::Confirmed(format!(
                    "The reservation is confirmed for {building} {}",
                    room.name
                ))
            },
        }
    }

    fn cancel(state: &mut BuildingState, room: &str) -> BuildingReply {
        match state.room_mut(room) {
            None => BuildingReply::RoomNotFound("This room does not exist.".to_string()),
            Some(room) if !room.booked => {
                BuildingReply::RoomNotBooked("This room is not booked.".to_string())
            },
            Some(room) => {
                room.booked = false;
                BuildingReply::Cancelled(format!("Reservation cancelled for {}", room.name))
            },
        }
    }

    fn reply(
        state: &BuildingState,
        reply: &BuildingReply,
        metadata: Option<Value>,
        env: &BuildingEnvironment,
    ) -> Effect<BuildingAction> {
        match reply.to_envelope() {
            Ok(envelope) => {
                let mut envelope = envelope.with_metadata_from(metadata);
                envelope.set_metadata(ORIGIN, building_key(state.id));
                publish!(env.bus, Route::direct(RENTAL_AGENT_KEY), envelope)
            },
            Err(error) => {
                tracing::error!(building = state.id, error = %error, "Failed to encode reply");
                Effect::None
            },
        }
    }
}

impl Reducer for BuildingReducer {
    type State = BuildingState;
    type Action = BuildingAction;
    type Environment = BuildingEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let (reply, metadata) = match action {
            BuildingAction::Reserve { room, metadata } => (Self::reserve(state, &room), metadata),
            BuildingAction::Cancel { room, metadata } => (Self::cancel(state, &room), metadata),
        };

        tracing::debug!(building = state.id, outcome = %reply.kind(), "Room operation handled");
        smallvec![Self::reply(state, &reply, metadata, env)]
    }
}
