//! Player position-sharing client
//!
//! Connects a player to a pub/sub broker, broadcasts its position at a
//! throttled cadence, and surfaces other players' positions as events.

pub mod client;
pub mod config;
pub mod network;
pub mod telemetry;

// Re-export main types
pub use client::{ConnectionState, Payload, PlayerClient, PositionUpdate, TopicTarget};
pub use config::{AppConfig, ClientConfig};
pub use network::{ClientEvent, EventBus, EventKind, LocalBroker, Transport, TransportFactory};
