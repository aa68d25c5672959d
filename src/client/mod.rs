//! Player Client
//!
//! Owns the broker session for one player:
//! - connect / subscribe / join announcement on success
//! - throttled, coalesced position broadcasts while connected
//! - filtering of inbound position messages
//! - lifecycle and message events on the [`EventBus`]
//!
//! Transport callbacks are tagged with the session generation they were
//! registered for. Callbacks from a replaced transport are ignored.

pub mod router;
pub mod state;
pub mod throttle;
pub mod topic;

pub use router::{InboundRouter, ParsedTopic, Route};
pub use state::{ConnectionState, SessionStateMachine, StateTransition};
pub use throttle::{OutboundThrottle, QueuedMessage};
pub use topic::{Payload, PositionUpdate, TopicTarget};

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::network::event_bus::{ClientEvent, EventBus, EventKind, EventProcessor};
use crate::network::transport::{
    ConnectFailure, OutboundMessage, Transport, TransportError, TransportFactory, TransportHandler,
    TransportLink,
};
use crate::telemetry::metrics;

type SuccessHook = Arc<dyn Fn(&str) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&ConnectFailure) + Send + Sync>;

/// Per-session state guarded by one lock
struct Session {
    machine: SessionStateMachine,
    transport: Option<Arc<dyn Transport>>,
    pair_id: Option<String>,
}

struct ClientInner {
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    events: EventBus,
    router: InboundRouter,
    throttle: OutboundThrottle,
    session: Mutex<Session>,
    generation: AtomicU64,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

/// Builder for [`PlayerClient`]
pub struct PlayerClientBuilder {
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    event_capacity: usize,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

impl PlayerClientBuilder {
    /// Called with the client id after the session is set up
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the failure after a connect attempt fails
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<PlayerClient> {
        self.config.validate()?;
        anyhow::ensure!(self.event_capacity > 0, "event_capacity must be positive");

        let inner = ClientInner {
            router: InboundRouter::new(self.config.client_id.clone()),
            throttle: OutboundThrottle::new(self.config.throttle_period()),
            events: EventBus::new(self.event_capacity),
            session: Mutex::new(Session {
                machine: SessionStateMachine::new(),
                transport: None,
                pair_id: None,
            }),
            generation: AtomicU64::new(0),
            factory: self.factory,
            on_success: self.on_success,
            on_failure: self.on_failure,
            config: self.config,
        };

        Ok(PlayerClient {
            inner: Arc::new(inner),
        })
    }
}

/// Position-sharing client for one player
#[derive(Clone)]
pub struct PlayerClient {
    inner: Arc<ClientInner>,
}

impl PlayerClient {
    pub fn builder(config: ClientConfig, factory: Arc<dyn TransportFactory>) -> PlayerClientBuilder {
        PlayerClientBuilder {
            config,
            factory,
            event_capacity: 1024,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn new(config: ClientConfig, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        Self::builder(config, factory).build()
    }

    /// Start connecting to the broker.
    ///
    /// Calling this again replaces the transport handle; callbacks from the
    /// old handle are ignored. A connect call the transport rejects outright
    /// is handled like an asynchronous connect failure and also returned.
    pub fn init(&self) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.config;
        let transport = inner
            .factory
            .create(&config.hostname, config.port, &config.client_id);

        let generation = {
            let mut session = inner.session.lock();
            let previous = session.machine.current_state();
            if previous != ConnectionState::Disconnected {
                warn!("init called while {}; replacing transport handle", previous);
                inner.throttle.stop();
            }
            session.machine.transition_to(ConnectionState::Connecting);
            session.transport = Some(transport.clone());
            inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let options = config.connect_options();
        info!(
            "Connecting to broker at {}:{} as {}",
            options.hostname, options.port, options.client_id
        );

        let link = TransportLink::new(Arc::new(SessionHandler {
            inner: Arc::downgrade(&self.inner),
            generation,
        }));

        if let Err(e) = transport.connect(&options, link) {
            inner.handle_connect_failure(generation, ConnectFailure::from(e.clone()));
            return Err(anyhow::anyhow!("connect to {}:{} failed: {}", options.hostname, options.port, e));
        }
        Ok(())
    }

    /// True iff a transport handle exists and reports itself connected
    pub fn connected(&self) -> bool {
        self.inner
            .current_transport()
            .map_or(false, |transport| transport.is_connected())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().machine.current_state()
    }

    pub fn state_history(&self) -> Vec<StateTransition> {
        self.inner.session.lock().machine.history().to_vec()
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    pub fn topic_prefix(&self) -> &str {
        &self.inner.config.topic_prefix
    }

    pub fn pair_id(&self) -> Option<String> {
        self.inner.session.lock().pair_id.clone()
    }

    pub fn set_pair_id(&self, pair_id: Option<String>) {
        self.inner.session.lock().pair_id = pair_id;
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_kind(&self, kind: EventKind) -> EventProcessor {
        self.inner.events.subscribe_kind(kind)
    }

    /// Queue a message for the next throttle tick
    pub fn enqueue_message(&self, target: impl Into<TopicTarget>, payload: impl Into<Payload>) {
        self.inner.throttle.enqueue(target.into(), payload.into());
    }

    /// Queue this client's position for broadcast on `{prefix}/{client_id}/positions`
    pub fn broadcast_positions<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let payload = Payload::json(data)?;
        let topic = topic::position_topic(&self.inner.config.topic_prefix, &self.inner.config.client_id);
        self.inner.throttle.enqueue(TopicTarget::Topic(topic), payload);
        Ok(())
    }

    /// Send immediately. Transport failures are logged and suppressed.
    pub fn send_message(&self, target: impl Into<TopicTarget>, payload: impl Into<Payload>) {
        self.inner.send_message(target.into(), payload.into());
    }

    pub fn pending_messages(&self) -> usize {
        self.inner.throttle.pending_len()
    }

    pub fn throttle_running(&self) -> bool {
        self.inner.throttle.is_running()
    }

    pub fn throttle_ticks(&self) -> u64 {
        self.inner.throttle.tick_count()
    }

    #[cfg(test)]
    fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl ClientInner {
    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.session.lock().transport.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if current != generation {
            debug!("Ignoring callback from stale session {} (current {})", generation, current);
            return false;
        }
        true
    }

    fn send_message(&self, target: TopicTarget, payload: Payload) {
        let topic = target.resolve(&self.config.client_id);
        let payload = payload.into_text();

        let result = match self.current_transport() {
            Some(transport) => transport.send(OutboundMessage {
                topic: topic.clone(),
                payload: payload.clone(),
            }),
            None => Err(TransportError::NotConnected),
        };

        match result {
            Ok(()) => {
                trace!("Sent {} bytes to {}", payload.len(), topic);
                metrics::record_message_sent();
                self.events.publish(ClientEvent::Sent { topic, data: payload });
            }
            Err(e) => {
                warn!("Failed to send to {}: {}", topic, e);
                metrics::record_send_failure();
            }
        }
    }

    fn handle_connect_success(self: &Arc<Self>, generation: u64) {
        let transport = {
            let mut session = self.session.lock();
            if !self.is_current(generation) {
                return;
            }
            if !session.machine.transition_to(ConnectionState::Connected) {
                return;
            }
            session.transport.clone()
        };
        let Some(transport) = transport else {
            return;
        };

        info!("Connected to broker as {}", self.config.client_id);
        let prefix = &self.config.topic_prefix;

        let filter = topic::position_filter(prefix);
        if let Err(e) = transport.subscribe(&filter) {
            warn!("Failed to subscribe to {}: {}", filter, e);
        }

        self.send_message(
            TopicTarget::Topic(topic::join_topic(prefix)),
            Payload::Text(topic::join_announcement(&self.config.client_id)),
        );

        // The timer only changes hands under the session lock; a session
        // replaced or lost while subscribing must not get one.
        {
            let session = self.session.lock();
            if !self.is_current(generation) || !session.machine.is_connected() {
                debug!(
                    "Session for {} replaced before it went live",
                    self.config.client_id
                );
                return;
            }

            let weak = Arc::downgrade(self);
            self.throttle.start(move |message| {
                if let Some(inner) = weak.upgrade() {
                    inner.send_message(message.target, message.payload);
                }
            });

            metrics::record_connection_status(true);
            self.events.publish(ClientEvent::Connected {
                client_id: self.config.client_id.clone(),
            });
        }

        if let Some(hook) = &self.on_success {
            hook(&self.config.client_id);
        }
    }

    fn handle_connect_failure(&self, generation: u64, failure: ConnectFailure) {
        {
            let mut session = self.session.lock();
            if !self.is_current(generation) {
                return;
            }
            if session.machine.current_state() != ConnectionState::Connecting {
                debug!("Ignoring connect failure while {}", session.machine.current_state());
                return;
            }
            session
                .machine
                .transition_to_with_reason(ConnectionState::Disconnected, Some(failure.to_string()));
            session.transport = None;
        }

        warn!("Failed to connect: {}", failure);
        if let Some(hook) = &self.on_failure {
            hook(&failure);
        }
    }

    fn handle_connection_lost(&self, generation: u64, reason: &str) {
        let uptime = {
            let mut session = self.session.lock();
            if !self.is_current(generation) {
                return;
            }
            let uptime = session.machine.time_in_state();
            if !session
                .machine
                .transition_to_with_reason(ConnectionState::Disconnected, Some(reason.to_string()))
            {
                return;
            }
            session.pair_id = None;
            session.transport = None;
            self.throttle.stop();
            uptime
        };

        info!(
            "Player client {} disconnected after {:?}: {}",
            self.config.client_id, uptime, reason
        );
        metrics::record_connection_status(false);
        self.events.publish(ClientEvent::Disconnected {
            client_id: self.config.client_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn handle_message(&self, generation: u64, topic: &str, payload: &str) {
        if !self.is_current(generation) {
            return;
        }

        if self.config.verbose {
            info!("Got message: {} {}", topic, payload);
        } else {
            trace!("Got message: {} {}", topic, payload);
        }

        match self.router.route(topic, payload) {
            Route::Dispatch(event) => {
                metrics::record_message_received();
                self.events.publish(event);
            }
            Route::OwnMessage | Route::NotPositions | Route::Malformed => {
                metrics::record_message_filtered();
            }
        }
    }
}

/// Callbacks for one session generation
struct SessionHandler {
    inner: Weak<ClientInner>,
    generation: u64,
}

impl TransportHandler for SessionHandler {
    fn on_connect_success(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_connect_success(self.generation);
        }
    }

    fn on_connect_failure(&self, failure: ConnectFailure) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_connect_failure(self.generation, failure);
        }
    }

    fn on_connection_lost(&self, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_connection_lost(self.generation, reason);
        }
    }

    fn on_message_arrived(&self, topic: &str, payload: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_message(self.generation, topic, payload);
        }
    }
}
