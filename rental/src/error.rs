//! Service-level errors.

use crate::input::InputError;
use booking_core::bus::BusError;
use booking_core::envelope::EnvelopeError;
use booking_runtime::StoreError;
use thiserror::Error;

/// Errors surfaced by the application wiring.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The broker refused an operation
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// A store rejected an action
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A message could not be encoded or decoded
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Console input was rejected
    #[error(transparent)]
    Input(#[from] InputError),

    /// A building worker with this id is already running
    #[error("Building {0} is already running")]
    BuildingExists(u32),

    /// A client with this name is already connected
    #[error("Client '{0}' is already connected")]
    ClientExists(String),

    /// Components did not stop in time
    #[error("Shutdown incomplete: {0}")]
    Shutdown(String),
}
