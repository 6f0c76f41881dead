//! Domain layer for the TMS platform.
//!
//! Holds the entities the platform streams to browsers and the tenant-scoped
//! stores that act as their `sse::DataSource`. The `web` layer depends on this
//! crate and never reaches into the stores' internals directly.

pub mod error;
pub mod shipment;

pub use shipment::{NewShipment, Shipment, ShipmentBoard, ShipmentStatus, SHIPMENTS_STREAM};

/// Identifier type shared by all domain entities.
pub type Id = uuid::Uuid;
