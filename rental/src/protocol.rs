//! Wire protocol shared by every booking service.
//!
//! Message kinds, routing keys and queue names, plus the payload shapes that
//! are more than a plain string. Each service decodes only the subset of kinds
//! its inbox accepts (see the `Inbound` impls next to each reducer).

use booking_core::envelope::{Envelope, EnvelopeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Routing
// ============================================================================

/// Direct exchange carrying every point-to-point message
pub const DIRECT_EXCHANGE: &str = "rental_direct";

/// Fanout exchange carrying building creation broadcasts
pub const FANOUT_EXCHANGE: &str = "buildings_fanout";

/// Routing key of the rental agent
pub const RENTAL_AGENT_KEY: &str = "RENTAL_AGENT";

/// Queue the rental agent consumes direct requests from
pub const RENTAL_AGENT_QUEUE: &str = "RENTAL_AGENT_QUEUE";

/// Queue the rental agent consumes broadcasts from
pub const RENTAL_AGENT_NOTIFICATION_QUEUE: &str = "RENTAL_AGENT_NOTIFICATION_QUEUE";

/// Queue the building registry consumes broadcasts from
pub const BUILDING_MANAGER_QUEUE: &str = "BUILDING_MANAGER_QUEUE";

/// Routing key of a client
#[must_use]
pub fn client_key(name: &str) -> String {
    format!("CLIENT_KEY{name}")
}

/// Queue a client consumes direct replies from
#[must_use]
pub fn client_queue(name: &str) -> String {
    format!("CLIENT_QUEUE{name}")
}

/// Queue a client consumes broadcasts from
#[must_use]
pub fn client_notification_queue(name: &str) -> String {
    format!("CLIENT_NOTIFICATION_QUEUE{name}")
}

/// Routing key of a building service
#[must_use]
pub fn building_key(id: u32) -> String {
    format!("BUILDING_KEY{id}")
}

/// Queue a building service consumes from
#[must_use]
pub fn building_queue(id: u32) -> String {
    format!("BUILDING_QUEUE{id}")
}

/// Display name of a building
#[must_use]
pub fn building_name(id: u32) -> String {
    format!("Building-{id}")
}

/// Display name of the `n`th room (1-based)
#[must_use]
pub fn room_name(n: usize) -> String {
    format!("Room-{n}")
}

// ============================================================================
// Message kinds
// ============================================================================

/// Every message kind on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client asks for the building listing (no payload)
    RequestBuildings,
    /// Rendered listing lines
    ResponseBuildings,
    /// `"requester,building,room"` to the agent, room name to a building
    MakeReservation,
    /// Reservation number to the agent, room name to a building
    CancelReservation,
    /// Building accepted a booking
    ConfirmReservation,
    /// Number issued for a new reservation
    ReservationNumber,
    /// Room was already booked
    AlreadyBooked,
    /// Building has no such room
    RoomNotFound,
    /// Cancel of a room that is free
    RoomNotBooked,
    /// Building released a room
    ReservationCancelled,
    /// Agent knows no such building
    BuildingNotFound,
    /// Agent knows no such reservation
    ReservationNotFound,
    /// Broadcast request for a new building (room count as string)
    CreateBuilding,
    /// Broadcast announcement of a started building
    BuildingCreated,
}

impl MessageKind {
    /// Tag carried in [`Envelope::kind`]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestBuildings => "RequestBuildings",
            Self::ResponseBuildings => "ResponseBuildings",
            Self::MakeReservation => "MakeReservation",
            Self::CancelReservation => "CancelReservation",
            Self::ConfirmReservation => "ConfirmReservation",
            Self::ReservationNumber => "ReservationNumber",
            Self::AlreadyBooked => "AlreadyBooked",
            Self::RoomNotFound => "RoomNotFound",
            Self::RoomNotBooked => "RoomNotBooked",
            Self::ReservationCancelled => "ReservationCancelled",
            Self::BuildingNotFound => "BuildingNotFound",
            Self::ReservationNotFound => "ReservationNotFound",
            Self::CreateBuilding => "CreateBuilding",
            Self::BuildingCreated => "BuildingCreated",
        }
    }

    /// Kind of an envelope, `None` when the tag is not part of the protocol
    #[must_use]
    pub fn of(envelope: &Envelope) -> Option<Self> {
        envelope.kind.parse().ok()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "RequestBuildings" => Self::RequestBuildings,
            "ResponseBuildings" => Self::ResponseBuildings,
            "MakeReservation" => Self::MakeReservation,
            "CancelReservation" => Self::CancelReservation,
            "ConfirmReservation" => Self::ConfirmReservation,
            "ReservationNumber" => Self::ReservationNumber,
            "AlreadyBooked" => Self::AlreadyBooked,
            "RoomNotFound" => Self::RoomNotFound,
            "RoomNotBooked" => Self::RoomNotBooked,
            "ReservationCancelled" => Self::ReservationCancelled,
            "BuildingNotFound" => Self::BuildingNotFound,
            "ReservationNotFound" => Self::ReservationNotFound,
            "CreateBuilding" => Self::CreateBuilding,
            "BuildingCreated" => Self::BuildingCreated,
            other => return Err(EnvelopeError::UnknownKind(other.to_string())),
        };
        Ok(kind)
    }
}

/// Encode a plain string payload.
///
/// # Errors
///
/// Returns [`EnvelopeError::Encode`] if serialization fails.
pub fn text_envelope(kind: MessageKind, text: &str) -> Result<Envelope, EnvelopeError> {
    Envelope::encode(kind.as_str(), text)
}

// ============================================================================
// Payloads
// ============================================================================

/// `MakeReservation` payload sent by a client: `"requester,building,room"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Username of the requester
    pub requester: String,
    /// Building name as typed by the requester
    pub building: String,
    /// Room name as typed by the requester
    pub room: String,
}

impl ReservationRequest {
    /// Parse the comma-separated payload.
    ///
    /// # Errors
    ///
    /// Returns a reason unless the payload has exactly three non-empty fields.
    pub fn parse(payload: &str) -> Result<Self, String> {
        let fields: Vec<&str> = payload.split(',').collect();
        match fields.as_slice() {
            [requester, building, room]
                if !requester.is_empty() && !building.is_empty() && !room.is_empty() =>
            {
                Ok(Self {
                    requester: (*requester).to_string(),
                    building: (*building).to_string(),
                    room: (*room).to_string(),
                })
            },
            _ => Err(format!(
                "expected \"requester,building,room\", got {} field(s) in '{payload}'",
                fields.len()
            )),
        }
    }

    /// Render the payload.
    #[must_use]
    pub fn to_payload(&self) -> String {
        format!("{},{},{}", self.requester, self.building, self.room)
    }
}

/// `BuildingCreated` announcement.
///
/// On the wire this is a list of strings: the announcement text, the building
/// name, then one entry per room. The id is recovered from the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildingAnnouncement {
    /// Sequential building id
    pub id: u32,
    /// `Building-<id>`
    pub name: String,
    /// Room names in order
    pub rooms: Vec<String>,
    /// Human readable announcement
    pub announcement: String,
}

impl BuildingAnnouncement {
    /// Announcement for a freshly started building.
    #[must_use]
    pub fn new(id: u32, room_count: usize) -> Self {
        let name = building_name(id);
        Self {
            id,
            announcement: format!("{name} is created!"),
            name,
            rooms: (1..=room_count).map(room_name).collect(),
        }
    }

    /// Encode as a `BuildingCreated` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        let lines: Vec<&str> = [self.announcement.as_str(), self.name.as_str()]
            .into_iter()
            .chain(self.rooms.iter().map(String::as_str))
            .collect();
        Envelope::encode(MessageKind::BuildingCreated.as_str(), &lines)
    }

    /// Decode the list payload of a `BuildingCreated` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when the payload is not a list, the
    /// announcement is blank, or the name is not `Building-<id>`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EnvelopeError> {
        let lines: Vec<String> = envelope.decode()?;
        let mut lines = lines.into_iter();
        let (Some(announcement), Some(name)) = (lines.next(), lines.next()) else {
            return Err(envelope.malformed("expected announcement and building name"));
        };
        if announcement.trim().is_empty() {
            return Err(envelope.malformed("blank announcement"));
        }
        let id = name
            .strip_prefix("Building-")
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| envelope.malformed(format!("'{name}' is not a building name")))?;

        Ok(Self {
            id,
            name,
            rooms: lines.collect(),
            announcement,
        })
    }
}

impl fmt::Display for BuildingAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.announcement)
    }
}

/// Which room operation a building outcome answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomOperation {
    /// Book the room
    Reserve,
    /// Release the room
    Cancel,
}

/// Outcome of a room operation, as produced by a building and forwarded by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildingReply {
    /// Room booked
    Confirmed(String),
    /// Room was already booked
    AlreadyBooked(String),
    /// No such room
    RoomNotFound(String),
    /// Room was free
    RoomNotBooked(String),
    /// Room released
    Cancelled(String),
}

impl BuildingReply {
    /// Kind tag of the reply
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Confirmed(_) => MessageKind::ConfirmReservation,
            Self::AlreadyBooked(_) => MessageKind::AlreadyBooked,
            Self::RoomNotFound(_) => MessageKind::RoomNotFound,
            Self::RoomNotBooked(_) => MessageKind::RoomNotBooked,
            Self::Cancelled(_) => MessageKind::ReservationCancelled,
        }
    }

    /// Operation this reply answers; `None` when it can answer either
    #[must_use]
    pub const fn operation(&self) -> Option<RoomOperation> {
        match self {
            Self::Confirmed(_) | Self::AlreadyBooked(_) => Some(RoomOperation::Reserve),
            Self::Cancelled(_) | Self::RoomNotBooked(_) => Some(RoomOperation::Cancel),
            Self::RoomNotFound(_) => None,
        }
    }

    /// Human readable text
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Confirmed(text)
            | Self::AlreadyBooked(text)
            | Self::RoomNotFound(text)
            | Self::RoomNotBooked(text)
            | Self::Cancelled(text) => text,
        }
    }

    /// Whether the operation took effect
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::Cancelled(_))
    }

    /// Encode as an envelope without metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        text_envelope(self.kind(), self.text())
    }

    /// Decode a building reply; `Ok(None)` for any other kind.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when the payload is not a string.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError> {
        let wrap: fn(String) -> Self = match MessageKind::of(envelope) {
            Some(MessageKind::ConfirmReservation) => Self::Confirmed,
            Some(MessageKind::AlreadyBooked) => Self::AlreadyBooked,
            Some(MessageKind::RoomNotFound) => Self::RoomNotFound,
            Some(MessageKind::RoomNotBooked) => Self::RoomNotBooked,
            Some(MessageKind::ReservationCancelled) => Self::Cancelled,
            _ => return Ok(None),
        };
        Ok(Some(wrap(envelope.decode()?)))
    }
}
