//! Event Bus for Client Lifecycle and Message Events
//!
//! Consumers subscribe to the bus; only the client core publishes to it.

use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Events emitted by a player client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Broker accepted the connection and the session is live
    Connected {
        client_id: String,
    },
    /// The transport reported the connection lost
    Disconnected {
        client_id: String,
        reason: String,
    },
    /// A message was handed to the transport
    Sent {
        topic: String,
        data: String,
    },
    /// A position message from another client
    Received {
        topic: String,
        data: String,
        client_id: String,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected { .. } => EventKind::Connected,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::Sent { .. } => EventKind::Sent,
            ClientEvent::Received { .. } => EventKind::Received,
        }
    }
}

/// Discriminant used to subscribe to one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Sent,
    Received,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Connected => write!(f, "connected"),
            EventKind::Disconnected => write!(f, "disconnected"),
            EventKind::Sent => write!(f, "sent"),
            EventKind::Received => write!(f, "received"),
        }
    }
}

/// Event bus for broadcasting client events to multiple subscribers
#[derive(Debug)]
pub struct EventBus {
    /// Broadcast sender
    sender: broadcast::Sender<ClientEvent>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a single kind of event
    pub fn subscribe_kind(&self, kind: EventKind) -> EventProcessor {
        EventProcessor::filtered(self, &kind.to_string(), kind)
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn publish(&self, event: ClientEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(count) => {
                debug!("Event '{}' sent to {} receivers", kind, count);
            }
            Err(_) => {
                debug!("No receivers for event '{}'", kind);
            }
        }
    }

    /// Get number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Event processor that reads events of one kind from the bus
pub struct EventProcessor {
    receiver: broadcast::Receiver<ClientEvent>,
    kind: EventKind,
    /// Name for logging
    name: String,
}

impl EventProcessor {
    /// Create a processor receiving only `kind` events
    pub fn filtered(bus: &EventBus, name: &str, kind: EventKind) -> Self {
        Self {
            receiver: bus.subscribe(),
            kind,
            name: name.to_string(),
        }
    }

    fn accepts(&self, event: &ClientEvent) -> bool {
        event.kind() == self.kind
    }

    /// Wait for the next matching event
    pub async fn next(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(
                        "Event processor '{}' lagged by {} messages",
                        self.name, count
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for processor '{}'", self.name);
                    return None;
                }
            }
        }
    }

    /// Try to receive a matching event without waiting
    pub fn try_next(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(
                        "Event processor '{}' lagged by {} messages",
                        self.name, count
                    );
                }
                Err(_) => return None,
            }
        }
    }
}

/// Run `handler` for every `kind` event until the bus closes
pub fn spawn_event_handler<F, Fut>(
    bus: &EventBus,
    kind: EventKind,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(ClientEvent) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut processor = bus.subscribe_kind(kind);

    tokio::spawn(async move {
        debug!("Event handler '{}' started", kind);
        while let Some(event) = processor.next().await {
            handler(event).await;
        }
        debug!("Event handler '{}' stopped", kind);
    })
}
