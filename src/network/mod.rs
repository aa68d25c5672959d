//! Network module
//!
//! Transport seam, in-process broker, and the event bus consumers listen on.

pub mod event_bus;
pub mod local;
pub mod transport;

pub use event_bus::{spawn_event_handler, ClientEvent, EventBus, EventKind, EventProcessor};
pub use local::{LocalBroker, LocalTransport};
pub use transport::{
    ConnectFailure, OutboundMessage, Transport, TransportError, TransportFactory, TransportHandler,
    TransportLink,
};
