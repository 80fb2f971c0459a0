//! Local validation of console input.
//!
//! Everything here runs before a message is sent: malformed input never
//! reaches the bus.

use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

#[allow(clippy::expect_used)]
static BUILDING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^building-\d+$").expect("building pattern is valid"));

#[allow(clippy::expect_used)]
static ROOM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^room-\d+$").expect("room pattern is valid"));

/// Rejected console input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Building name does not look like `building-<n>`
    #[error("Invalid building name '{0}', expected e.g. building-1")]
    InvalidBuilding(String),

    /// Room name does not look like `room-<n>`
    #[error("Invalid room name '{0}', expected e.g. room-1")]
    InvalidRoom(String),

    /// Username is empty or would break the reservation payload
    #[error("Invalid username '{0}': it must be non-empty and contain no commas or spaces")]
    InvalidUsername(String),

    /// Reservation number is empty
    #[error("Reservation number must not be empty")]
    EmptyReservationNumber,

    /// Menu choice outside 1..=5
    #[error("Invalid choice '{0}'. Please try again.")]
    InvalidChoice(String),
}

/// Validate a building name (`building-<n>`, any case).
///
/// # Errors
///
/// Returns [`InputError::InvalidBuilding`] when the trimmed input does not match.
pub fn building(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if BUILDING_PATTERN.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(InputError::InvalidBuilding(trimmed.to_string()))
    }
}

/// Validate a room name (`room-<n>`, any case).
///
/// # Errors
///
/// Returns [`InputError::InvalidRoom`] when the trimmed input does not match.
pub fn room(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if ROOM_PATTERN.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(InputError::InvalidRoom(trimmed.to_string()))
    }
}

/// Validate a username.
///
/// # Errors
///
/// Returns [`InputError::InvalidUsername`] for empty names and names with
/// commas or whitespace.
pub fn username(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.contains(',') || trimmed.contains(char::is_whitespace) {
        Err(InputError::InvalidUsername(trimmed.to_string()))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Validate a reservation number.
///
/// # Errors
///
/// Returns [`InputError::EmptyReservationNumber`] for blank input.
pub fn reservation_number(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Err(InputError::EmptyReservationNumber)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Console menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    /// 1. List Buildings
    ListBuildings,
    /// 2. Make a Reservation
    MakeReservation,
    /// 3. Cancel the Reservation
    CancelReservation,
    /// 4. View My Reservations
    ViewReservations,
    /// 5. Quit
    Quit,
}

impl FromStr for MenuChoice {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::ListBuildings),
            "2" => Ok(Self::MakeReservation),
            "3" => Ok(Self::CancelReservation),
            "4" => Ok(Self::ViewReservations),
            "5" => Ok(Self::Quit),
            other => Err(InputError::InvalidChoice(other.to_string())),
        }
    }
}
