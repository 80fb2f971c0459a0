//! Client (requester) service.
//!
//! Sends requests to the rental agent and keeps a local, possibly stale copy
//! of its own reservations built only from the agent's replies. Everything
//! worth showing to the user is emitted as a [`Notice`].

use crate::protocol::{
    BuildingAnnouncement, BuildingReply, MessageKind, RENTAL_AGENT_KEY, ReservationRequest, client_key,
    text_envelope,
};
use booking_core::bus::{MessageBus, Route};
use booking_core::environment::IdGenerator;
use booking_core::envelope::{CORRELATION_ID, Envelope, EnvelopeError, Inbound, REPLY_TO, RESERVATION};
use booking_core::{Reducer, SmallVec, async_effect, effect::Effect, publish, smallvec};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Notices
// ============================================================================

/// How a notice should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Operation succeeded (green)
    Success,
    /// Operation failed (red)
    Failure,
    /// Plain information
    Info,
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Rendering hint
    pub tone: Tone,
    /// Text, possibly multi-line
    pub text: String,
}

impl Notice {
    fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ============================================================================
// State
// ============================================================================

/// Local view of a reservation's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    /// Number received, no outcome yet
    Pending,
    /// Building confirmed
    Confirmed,
    /// Building refused the booking
    Rejected,
    /// Cancel sent, no outcome yet
    Cancelling,
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Cancelling => "CANCELLING",
        };
        f.write_str(s)
    }
}

/// A reservation as the client knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReservation {
    /// Reservation number
    pub number: String,
    /// Building as typed
    pub building: String,
    /// Room as typed
    pub room: String,
    /// Local status
    pub status: LocalStatus,
}

impl fmt::Display for LocalReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "*Reservation Number: {}\n- Building: {}\n- Room: {}\n- Status: {}",
            self.number, self.building, self.room, self.status
        )
    }
}

/// A request awaiting a direct reply, keyed by correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outstanding {
    List,
    Reserve { building: String, room: String },
    Cancel { number: String, previous: Option<LocalStatus> },
}

/// Client state.
#[derive(Debug, Clone)]
pub struct ClientState {
    /// Username
    pub name: String,
    /// Own reservations by number
    pub reservations: BTreeMap<String, LocalReservation>,
    /// Building announcements seen so far
    pub announcements: Vec<String>,
    outstanding: HashMap<String, Outstanding>,
}

impl ClientState {
    /// Fresh client
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reservations: BTreeMap::new(),
            announcements: Vec::new(),
            outstanding: HashMap::new(),
        }
    }

    /// Requests still awaiting a direct reply
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Client actions: local commands and decoded replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Ask for the building listing
    ListBuildings,
    /// Ask for a reservation (input already validated)
    Reserve {
        /// Building name
        building: String,
        /// Room name
        room: String,
    },
    /// Ask to cancel a reservation
    Cancel {
        /// Reservation number
        number: String,
    },
    /// `ResponseBuildings`
    Buildings {
        /// Listing lines
        listing: Vec<String>,
        /// Echoed correlation id
        correlation_id: Option<String>,
    },
    /// `ReservationNumber`
    ReservationNumber {
        /// The number
        number: String,
        /// Echoed correlation id
        correlation_id: Option<String>,
    },
    /// `BuildingNotFound`
    BuildingNotFound {
        /// Agent's text
        text: String,
        /// Echoed correlation id
        correlation_id: Option<String>,
    },
    /// `ReservationNotFound`
    ReservationNotFound {
        /// Agent's text
        text: String,
        /// Echoed correlation id
        correlation_id: Option<String>,
    },
    /// Building outcome forwarded by the agent
    Outcome {
        /// The outcome
        reply: BuildingReply,
        /// Reservation it concerns
        reservation: Option<String>,
        /// Correlation id of the originating request
        correlation_id: Option<String>,
    },
    /// `BuildingCreated` broadcast
    BuildingCreated {
        /// The new building
        announcement: BuildingAnnouncement,
    },
}

impl Inbound for ClientAction {
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        let correlation_id = envelope.metadata_str(CORRELATION_ID).map(str::to_string);

        if let Some(reply) = BuildingReply::from_envelope(envelope)? {
            return Ok(Some(Self::Outcome {
                reply,
                reservation: envelope.metadata_str(RESERVATION).map(str::to_string),
                correlation_id,
            }));
        }

        let action = match MessageKind::of(envelope) {
            Some(MessageKind::ResponseBuildings) => Self::Buildings {
                listing: envelope.decode()?,
                correlation_id,
            },
            Some(MessageKind::ReservationNumber) => Self::ReservationNumber {
                number: envelope.decode()?,
                correlation_id,
            },
            Some(MessageKind::BuildingNotFound) => Self::BuildingNotFound {
                text: envelope.decode()?,
                correlation_id,
            },
            Some(MessageKind::ReservationNotFound) => Self::ReservationNotFound {
                text: envelope.decode()?,
                correlation_id,
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

/// Client dependencies.
#[derive(Clone)]
pub struct ClientEnvironment {
    /// Shared bus handle
    pub bus: Arc<dyn MessageBus>,
    /// Correlation ids
    pub ids: Arc<dyn IdGenerator>,
    /// Where notices go
    pub notices: mpsc::UnboundedSender<Notice>,
}

/// Client reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientReducer;

impl ClientReducer {
    fn notify(env: &ClientEnvironment, notice: Notice) -> Effect<ClientAction> {
        let sink = env.notices.clone();
        async_effect! {
            if sink.send(notice).is_err() {
                tracing::debug!("Notice dropped, nobody is listening");
            }
            None
        }
    }

    fn request(
        state: &mut ClientState,
        env: &ClientEnvironment,
        outstanding: Outstanding,
        envelope: Result<Envelope, EnvelopeError>,
    ) -> Effect<ClientAction> {
        let correlation_id = env.ids.next_id();
        match envelope {
            Ok(envelope) => {
                let envelope = envelope
                    .with_metadata(REPLY_TO, client_key(&state.name))
                    .with_metadata(CORRELATION_ID, correlation_id.clone());
                state.outstanding.insert(correlation_id, outstanding);
                publish!(env.bus, Route::direct(RENTAL_AGENT_KEY), envelope)
            },
            Err(error) => {
                tracing::error!(error = %error, "Failed to encode request");
                Effect::None
            },
        }
    }

    fn take(state: &mut ClientState, correlation_id: Option<&String>) -> Option<Outstanding> {
        state.outstanding.remove(correlation_id?)
    }

    fn outcome(
        state: &mut ClientState,
        reply: &BuildingReply,
        reservation: Option<String>,
        correlation_id: Option<&String>,
    ) {
        let Some(number) = reservation else {
            return;
        };

        // The outcome may overtake the ReservationNumber reply
        if !state.reservations.contains_key(&number) {
            if let Some(Outstanding::Reserve { building, room }) =
                correlation_id.and_then(|id| state.outstanding.get(id))
            {
                state.reservations.insert(
                    number.clone(),
                    LocalReservation {
                        number: number.clone(),
                        building: building.clone(),
                        room: room.clone(),
                        status: LocalStatus::Pending,
                    },
                );
            }
        }

        let Some(entry) = state.reservations.get_mut(&number) else {
            return;
        };
        match reply {
            BuildingReply::Confirmed(_) => entry.status = LocalStatus::Confirmed,
            BuildingReply::AlreadyBooked(_) => entry.status = LocalStatus::Rejected,
            BuildingReply::RoomNotFound(_) if entry.status != LocalStatus::Cancelling => {
                entry.status = LocalStatus::Rejected;
            },
            BuildingReply::RoomNotFound(_) | BuildingReply::Cancelled(_) | BuildingReply::RoomNotBooked(_) => {
                state.reservations.remove(&number);
            },
        }
    }
}

impl Reducer for ClientReducer {
    type State = ClientState;
    type Action = ClientAction;
    type Environment = ClientEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per reply kind
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ClientAction::ListBuildings => {
                let envelope = Ok(Envelope::empty(MessageKind::RequestBuildings.as_str()));
                smallvec![Self::request(state, env, Outstanding::List, envelope)]
            },
            ClientAction::Reserve { building, room } => {
                let payload = ReservationRequest {
                    requester: state.name.clone(),
                    building: building.clone(),
                    room: room.clone(),
                }
                .to_payload();
                let envelope = text_envelope(MessageKind::MakeReservation, &payload);
                smallvec![Self::request(state, env, Outstanding::Reserve { building, room }, envelope)]
            },
            ClientAction::Cancel { number } => {
                let previous = state.reservations.get_mut(&number).map(|entry| {
                    let previous = entry.status;
                    entry.status = LocalStatus::Cancelling;
                    previous
                });
                let envelope = text_envelope(MessageKind::CancelReservation, &number);
                smallvec![Self::request(state, env, Outstanding::Cancel { number, previous }, envelope)]
            },
            ClientAction::Buildings { listing, correlation_id } => {
                Self::take(state, correlation_id.as_ref());
                let text = if listing.is_empty() {
                    "No buildings are available yet.".to_string()
                } else {
                    format!("Available buildings and rooms:\n{}", listing.join("\n"))
                };
                smallvec![Self::notify(env, Notice::new(Tone::Info, text))]
            },
            ClientAction::ReservationNumber { number, correlation_id } => {
                if let Some(Outstanding::Reserve { building, room }) = Self::take(state, correlation_id.as_ref()) {
                    state
                        .reservations
                        .entry(number.clone())
                        .or_insert(LocalReservation {
                            number: number.clone(),
                            building,
                            room,
                            status: LocalStatus::Pending,
                        });
                }
                smallvec![Self::notify(
                    env,
                    Notice::new(Tone::Success, format!("Your Reservation Number is: {number}"))
                )]
            },
            ClientAction::BuildingNotFound { text, correlation_id } => {
                if let Some(Outstanding::Cancel { number, previous: Some(previous) }) =
                    Self::take(state, correlation_id.as_ref())
                {
                    if let Some(entry) = state.reservations.get_mut(&number) {
                        entry.status = previous;
                    }
                }
                smallvec![Self::notify(
                    env,
                    Notice::new(Tone::Failure, format!("{text} Input a valid building"))
                )]
            },
            ClientAction::ReservationNotFound { text, correlation_id } => {
                if let Some(Outstanding::Cancel { number, .. }) = Self::take(state, correlation_id.as_ref()) {
                    state.reservations.remove(&number);
                }
                smallvec![Self::notify(env, Notice::new(Tone::Failure, text))]
            },
            ClientAction::Outcome {
                reply,
                reservation,
                correlation_id,
            } => {
                Self::outcome(state, &reply, reservation, correlation_id.as_ref());
                // An outcome is the last reply a request gets
                Self::take(state, correlation_id.as_ref());
                let text = match &reply {
                    BuildingReply::RoomNotFound(text) => format!("{text} Input a valid room"),
                    BuildingReply::RoomNotBooked(text) => format!("{text} Pick a valid booking"),
                    other => other.text().to_string(),
                };
                let tone = if reply.is_success() {
                    Tone::Success
                } else {
                    Tone::Failure
                };
                smallvec![Self::notify(env, Notice::new(tone, text))]
            },
            ClientAction::BuildingCreated { announcement } => {
                state.announcements.push(announcement.announcement.clone());
                smallvec![Self::notify(
                    env,
                    Notice::new(
                        Tone::Success,
                        format!("Fanout Message Received: {}", announcement.announcement)
                    )
                )]
            },
        }
    }
}
