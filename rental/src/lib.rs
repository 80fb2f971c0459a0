//! # Booking Rental
//!
//! Room booking across independently running services that only talk over a
//! message bus:
//!
//! - **Rental agent** ([`agent`]): mediates every request and owns the reservation table
//! - **Buildings** ([`building`]): one per building, owns its rooms' booking state
//! - **Building registry** ([`registry`]): starts supervised building workers on broadcast
//! - **Clients** ([`requester`]): send requests and keep a local view of their reservations
//!
//! ```text
//! client ──▶ agent ──▶ building ──▶ agent ──▶ client        (direct)
//! agent ──CreateBuilding──▶ registry ──BuildingCreated──▶ everyone   (fanout)
//! ```
//!
//! Each service is a reducer run by a [`Store`](booking_runtime::Store) and fed
//! by a queue [`Consumer`](booking_runtime::Consumer); [`app::Application`]
//! wires them together.

pub mod agent;
pub mod app;
pub mod building;
pub mod config;
pub mod error;
pub mod handler;
pub mod input;
pub mod protocol;
pub mod registry;
pub mod requester;
pub mod reservations;
pub mod supervisor;

pub use app::{Application, ClientHandle};
pub use config::Config;
pub use error::ServiceError;
