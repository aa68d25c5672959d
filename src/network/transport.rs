//! Transport seam
//!
//! The broker connection itself lives outside this crate. A transport only has
//! to start a connect attempt, accept subscriptions and fire-and-forget sends,
//! and report back through the [`TransportLink`] it was handed on connect.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConnectOptions;

/// A message handed to the transport for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Synchronous failure of a transport call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport rejected the operation: {0}")]
    Rejected(String),
}

/// Failure reported for a connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub error_code: i32,
    pub error_message: String,
}

impl ConnectFailure {
    pub fn new(error_code: i32, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.error_code, self.error_message)
    }
}

impl From<TransportError> for ConnectFailure {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::NotConnected => 1,
            TransportError::Rejected(_) => 2,
        };
        Self::new(code, err.to_string())
    }
}

/// Broker connection used by a player client
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start a connect attempt. The outcome, and every later connection-lost
    /// or message-arrival notification, is reported through `link`.
    fn connect(&self, options: &ConnectOptions, link: TransportLink) -> Result<(), TransportError>;

    /// Subscribe to a topic filter (`+` and `#` wildcards)
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Fire-and-forget send
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// Creates a transport handle for one connect attempt
pub trait TransportFactory: Send + Sync {
    fn create(&self, hostname: &str, port: u16, client_id: &str) -> Arc<dyn Transport>;
}

/// Receiver of transport notifications
pub trait TransportHandler: Send + Sync {
    fn on_connect_success(&self);
    fn on_connect_failure(&self, failure: ConnectFailure);
    fn on_connection_lost(&self, reason: &str);
    fn on_message_arrived(&self, topic: &str, payload: &str);
}

/// Callback registration handed to [`Transport::connect`]
#[derive(Clone)]
pub struct TransportLink {
    handler: Arc<dyn TransportHandler>,
}

impl TransportLink {
    pub fn new(handler: Arc<dyn TransportHandler>) -> Self {
        Self { handler }
    }

    pub fn connect_succeeded(&self) {
        self.handler.on_connect_success();
    }

    pub fn connect_failed(&self, failure: ConnectFailure) {
        self.handler.on_connect_failure(failure);
    }

    pub fn connection_lost(&self, reason: &str) {
        self.handler.on_connection_lost(reason);
    }

    pub fn message_arrived(&self, topic: &str, payload: &str) {
        self.handler.on_message_arrived(topic, payload);
    }
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}
