//! In-process broker
//!
//! Routes messages between transports created from the same [`LocalBroker`]
//! using MQTT topic filter rules. Each session gets its own delivery task, so
//! notifications reach a client asynchronously and in publish order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::network::transport::{
    ConnectFailure, OutboundMessage, Transport, TransportError, TransportFactory, TransportLink,
};

/// Notification queued for a session's delivery task
#[derive(Debug)]
enum Delivery {
    ConnectSucceeded,
    ConnectFailed(ConnectFailure),
    ConnectionLost(String),
    Message { topic: String, payload: String },
}

struct BrokerSession {
    id: u64,
    subscriptions: Vec<String>,
    outbox: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<String, BrokerSession>,
    next_session: u64,
    refusal: Option<ConnectFailure>,
}

/// Shared in-memory broker
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport bound to this broker
    pub fn transport(&self, hostname: &str, port: u16, client_id: &str) -> LocalTransport {
        LocalTransport {
            broker: self.clone(),
            endpoint: format!("{}:{}", hostname, port),
            client_id: client_id.to_string(),
            session_id: Mutex::new(None),
        }
    }

    /// Make every following connect attempt fail with `failure`; `None` accepts again.
    pub fn refuse_connections(&self, failure: Option<ConnectFailure>) {
        self.state.lock().refusal = failure;
    }

    /// Drop a client's session, reporting `reason` as the connection-lost cause
    pub fn disconnect_client(&self, client_id: &str, reason: &str) -> bool {
        let session = self.state.lock().sessions.remove(client_id);
        match session {
            Some(session) => {
                info!("Broker dropping client {}: {}", client_id, reason);
                let _ = session.outbox.send(Delivery::ConnectionLost(reason.to_string()));
                true
            }
            None => false,
        }
    }

    /// Ids of clients with a live session, sorted
    pub fn connected_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Publish from outside any client session. Returns the number of sessions reached.
    pub fn publish(&self, topic: &str, payload: &str) -> usize {
        self.route(topic, payload)
    }

    fn route(&self, topic: &str, payload: &str) -> usize {
        let state = self.state.lock();
        let mut delivered = 0;
        for session in state.sessions.values() {
            if session.subscriptions.iter().any(|filter| topic_matches(filter, topic)) {
                let message = Delivery::Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                };
                if session.outbox.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Routed {} to {} sessions", topic, delivered);
        delivered
    }

    fn open_session(&self, client_id: &str, outbox: mpsc::UnboundedSender<Delivery>) -> Result<u64, ConnectFailure> {
        let mut state = self.state.lock();
        if let Some(failure) = state.refusal.clone() {
            return Err(failure);
        }

        state.next_session += 1;
        let id = state.next_session;
        let session = BrokerSession {
            id,
            subscriptions: Vec::new(),
            outbox,
        };

        // A new session with the same client id takes over the old one
        if let Some(previous) = state.sessions.insert(client_id.to_string(), session) {
            warn!("Client {} reconnected, closing previous session", client_id);
            let _ = previous
                .outbox
                .send(Delivery::ConnectionLost("session taken over".to_string()));
        }
        Ok(id)
    }

    fn is_live(&self, client_id: &str, session_id: u64) -> bool {
        self.state
            .lock()
            .sessions
            .get(client_id)
            .map_or(false, |s| s.id == session_id)
    }

    fn add_subscription(&self, client_id: &str, session_id: u64, filter: &str) -> bool {
        let mut state = self.state.lock();
        match state.sessions.get_mut(client_id) {
            Some(session) if session.id == session_id => {
                if !session.subscriptions.iter().any(|f| f == filter) {
                    session.subscriptions.push(filter.to_string());
                }
                true
            }
            _ => false,
        }
    }

    fn close_session(&self, client_id: &str, session_id: u64) {
        let mut state = self.state.lock();
        if state.sessions.get(client_id).map_or(false, |s| s.id == session_id) {
            state.sessions.remove(client_id);
            debug!("Session {} for {} closed", session_id, client_id);
        }
    }
}

impl TransportFactory for LocalBroker {
    fn create(&self, hostname: &str, port: u16, client_id: &str) -> Arc<dyn Transport> {
        Arc::new(self.transport(hostname, port, client_id))
    }
}

/// Transport handle for one client session on a [`LocalBroker`]
pub struct LocalTransport {
    broker: LocalBroker,
    endpoint: String,
    client_id: String,
    session_id: Mutex<Option<u64>>,
}

impl LocalTransport {
    fn live_session(&self) -> Result<u64, TransportError> {
        match *self.session_id.lock() {
            Some(id) if self.broker.is_live(&self.client_id, id) => Ok(id),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl Transport for LocalTransport {
    fn connect(&self, options: &ConnectOptions, link: TransportLink) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Rejected(format!("no async runtime: {}", e)))?;

        let (outbox, mut inbox) = mpsc::unbounded_channel();
        debug!(
            "Local connect to {} as {} (clean_session={})",
            self.endpoint, options.client_id, options.clean_session
        );

        match self.broker.open_session(&self.client_id, outbox.clone()) {
            Ok(id) => {
                *self.session_id.lock() = Some(id);
                let _ = outbox.send(Delivery::ConnectSucceeded);
            }
            Err(failure) => {
                let _ = outbox.send(Delivery::ConnectFailed(failure));
            }
        }
        drop(outbox);

        runtime.spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                match delivery {
                    Delivery::ConnectSucceeded => link.connect_succeeded(),
                    Delivery::ConnectFailed(failure) => link.connect_failed(failure),
                    Delivery::ConnectionLost(reason) => link.connection_lost(&reason),
                    Delivery::Message { topic, payload } => link.message_arrived(&topic, &payload),
                }
            }
        });

        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let id = self.live_session()?;
        if self.broker.add_subscription(&self.client_id, id, filter) {
            debug!("{} subscribed to {}", self.client_id, filter);
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.live_session()?;
        self.broker.route(&message.topic, &message.payload);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live_session().is_ok()
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        if let Some(id) = *self.session_id.lock() {
            self.broker.close_session(&self.client_id, id);
        }
    }
}

/// MQTT topic filter matching: `+` matches one level, a trailing `#` matches the rest.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::TransportHandler;
    use std::time::Duration;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("g/+/positions", "g/alice/positions"));
        assert!(!topic_matches("g/+/positions", "g/alice/bob/positions"));
        assert!(!topic_matches("g/+/positions", "g/join"));
        assert!(topic_matches("g/join", "g/join"));
        assert!(topic_matches("g/#", "g/alice/positions"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("h/+/positions", "g/alice/positions"));
        assert!(!topic_matches("g/+", "g"));
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl TransportHandler for Recorder {
        fn on_connect_success(&self) {
            self.log.lock().push("success".to_string());
        }
        fn on_connect_failure(&self, failure: ConnectFailure) {
            self.log.lock().push(format!("failure {}", failure.error_code));
        }
        fn on_connection_lost(&self, reason: &str) {
            self.log.lock().push(format!("lost {}", reason));
        }
        fn on_message_arrived(&self, topic: &str, payload: &str) {
            self.log.lock().push(format!("{} {}", topic, payload));
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn options(client_id: &str) -> ConnectOptions {
        ConnectOptions {
            hostname: "local".to_string(),
            port: 0,
            client_id: client_id.to_string(),
            clean_session: true,
        }
    }

    #[tokio::test]
    async fn test_connect_and_route() {
        let broker = LocalBroker::new();
        let recorder = Arc::new(Recorder::default());
        let transport = broker.transport("local", 0, "alice");

        transport
            .connect(&options("alice"), TransportLink::new(recorder.clone()))
            .unwrap();
        assert!(transport.is_connected());
        transport.subscribe("g/+/positions").unwrap();

        assert_eq!(broker.publish("g/bob/positions", "{}"), 1);
        assert_eq!(broker.publish("g/join", "bob is alive"), 0);
        settle().await;

        let log = recorder.log.lock().clone();
        assert_eq!(log, vec!["success".to_string(), "g/bob/positions {}".to_string()]);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let broker = LocalBroker::new();
        broker.refuse_connections(Some(ConnectFailure::new(5, "not authorized")));
        let recorder = Arc::new(Recorder::default());
        let transport = broker.transport("local", 0, "alice");

        transport
            .connect(&options("alice"), TransportLink::new(recorder.clone()))
            .unwrap();
        settle().await;

        assert!(!transport.is_connected());
        assert_eq!(recorder.log.lock().clone(), vec!["failure 5".to_string()]);
        assert_eq!(
            transport.send(OutboundMessage {
                topic: "g/join".to_string(),
                payload: "x".to_string(),
            }),
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect_and_takeover() {
        let broker = LocalBroker::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        let t1 = broker.transport("local", 0, "alice");
        t1.connect(&options("alice"), TransportLink::new(first.clone())).unwrap();
        let t2 = broker.transport("local", 0, "alice");
        t2.connect(&options("alice"), TransportLink::new(second.clone())).unwrap();
        settle().await;

        assert!(!t1.is_connected());
        assert!(t2.is_connected());
        assert!(first.log.lock().contains(&"lost session taken over".to_string()));

        assert!(broker.disconnect_client("alice", "kicked"));
        settle().await;
        assert!(!t2.is_connected());
        assert!(second.log.lock().contains(&"lost kicked".to_string()));
        assert!(broker.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn test_drop_closes_session() {
        let broker = LocalBroker::new();
        let transport = broker.transport("local", 0, "alice");
        transport
            .connect(&options("alice"), TransportLink::new(Arc::new(Recorder::default())))
            .unwrap();
        assert_eq!(broker.connected_clients(), vec!["alice".to_string()]);

        drop(transport);
        assert!(broker.connected_clients().is_empty());
    }
}
