//! Inbound message routing
//!
//! Decides whether a message delivered by the transport becomes a
//! `received` event. Payloads are passed through untouched.

use crate::client::topic::POSITIONS_SUFFIX;
use crate::network::event_bus::ClientEvent;

/// Topic split into its leading levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub prefix: &'a str,
    pub sender: Option<&'a str>,
}

impl<'a> ParsedTopic<'a> {
    pub fn parse(topic: &'a str) -> Self {
        let mut levels = topic.split('/');
        Self {
            prefix: levels.next().unwrap_or_default(),
            sender: levels.next(),
        }
    }
}

/// Outcome of routing one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Dispatch(ClientEvent),
    /// Echo of this client's own broadcast
    OwnMessage,
    /// Topic does not end with the positions suffix
    NotPositions,
    /// Topic has no sender level
    Malformed,
}

#[derive(Debug, Clone)]
pub struct InboundRouter {
    own_id: String,
}

impl InboundRouter {
    pub fn new(own_id: impl Into<String>) -> Self {
        Self { own_id: own_id.into() }
    }

    pub fn route(&self, topic: &str, payload: &str) -> Route {
        let parsed = ParsedTopic::parse(topic);
        let sender = match parsed.sender {
            Some(sender) => sender,
            None => return Route::Malformed,
        };

        if sender == self.own_id {
            return Route::OwnMessage;
        }
        if !topic.ends_with(POSITIONS_SUFFIX) {
            return Route::NotPositions;
        }

        Route::Dispatch(ClientEvent::Received {
            topic: topic.to_string(),
            data: payload.to_string(),
            client_id: sender.to_string(),
        })
    }
}
