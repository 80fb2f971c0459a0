//! Reservation table owned by the rental agent.

use booking_core::environment::IdGenerator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Forwarded to the building, no outcome yet
    Pending,
    /// Building booked the room
    Confirmed,
    /// Cancelled; no longer in the active table
    Cancelled,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// One reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Opaque, never reused
    pub number: String,
    /// Username of the requester
    pub requester: String,
    /// Canonical building name (`Building-<id>`)
    pub building: String,
    /// Room name as requested
    pub room: String,
    /// Current status
    pub status: ReservationStatus,
    /// When the number was issued
    pub created_at: DateTime<Utc>,
}

/// Errors from the reservation table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The number was issued before
    #[error("Reservation number {0} was already issued")]
    NumberReused(String),
}

/// Active reservations plus every number ever issued.
#[derive(Debug, Clone, Default)]
pub struct ReservationBook {
    active: HashMap<String, Reservation>,
    issued: HashSet<String>,
}

impl ReservationBook {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new Pending reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::NumberReused`] if `number` was issued before,
    /// even if that reservation has since been cancelled.
    pub fn open(
        &mut self,
        number: String,
        requester: String,
        building: String,
        room: String,
        created_at: DateTime<Utc>,
    ) -> Result<&Reservation, ReservationError> {
        if !self.issued.insert(number.clone()) {
            return Err(ReservationError::NumberReused(number));
        }

        let reservation = Reservation {
            number: number.clone(),
            requester,
            building,
            room,
            status: ReservationStatus::Pending,
            created_at,
        };
        Ok(self.active.entry(number).or_insert(reservation))
    }

    /// Pending → Confirmed. Returns whether the status changed.
    pub fn confirm(&mut self, number: &str) -> bool {
        match self.active.get_mut(number) {
            Some(reservation) if reservation.status == ReservationStatus::Pending => {
                reservation.status = ReservationStatus::Confirmed;
                true
            },
            _ => false,
        }
    }

    /// Mark Cancelled and remove from the active table.
    pub fn cancel(&mut self, number: &str) -> Option<Reservation> {
        let mut reservation = self.active.remove(number)?;
        reservation.status = ReservationStatus::Cancelled;
        Some(reservation)
    }

    /// Active reservation by number
    #[must_use]
    pub fn get(&self, number: &str) -> Option<&Reservation> {
        self.active.get(number)
    }

    /// Whether `number` was ever issued
    #[must_use]
    pub fn was_issued(&self, number: &str) -> bool {
        self.issued.contains(number)
    }

    /// Number of active reservations
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether there are no active reservations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
