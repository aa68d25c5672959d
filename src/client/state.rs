//! Session State Machine
//!
//! Tracks the broker connection lifecycle:
//! - Disconnected: no live session, `init` may be called
//! - Connecting: connect attempt in flight
//! - Connected: session live, throttle timer running

use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// State transition record
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: i64,
    pub reason: Option<String>,
}

pub struct SessionStateMachine {
    current: ConnectionState,
    state_entered_at: Instant,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Disconnected,
            state_entered_at: Instant::now(),
            history: Vec::new(),
            max_history: 100,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.current
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self.current, target) {
            (Disconnected, Connecting) => true,

            // Repeated init replaces the transport handle
            (Connecting, Connecting) => true,
            (Connected, Connecting) => true,

            (Connecting, Connected) => true,
            (Connecting, Disconnected) => true,

            // Repeated success restarts the session
            (Connected, Connected) => true,
            (Connected, Disconnected) => true,

            _ => false,
        }
    }

    pub fn transition_to(&mut self, target: ConnectionState) -> bool {
        self.transition_to_with_reason(target, None)
    }

    pub fn transition_to_with_reason(&mut self, target: ConnectionState, reason: Option<String>) -> bool {
        if !self.can_transition_to(target) {
            warn!("Invalid state transition: {} -> {}", self.current, target);
            return false;
        }

        if self.current == target {
            debug!("Re-entering state {}", target);
        } else {
            info!(
                "State transition: {} -> {}{}",
                self.current,
                target,
                reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
            );
        }

        self.history.push(StateTransition {
            from: self.current,
            to: target,
            timestamp: chrono::Utc::now().timestamp_millis(),
            reason,
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.current = target;
        self.state_entered_at = Instant::now();
        true
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn is_connected(&self) -> bool {
        self.current == ConnectionState::Connected
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
