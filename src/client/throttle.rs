//! Outbound throttle
//!
//! Coalesces queued broadcasts so at most one message goes out per tick.
//! The pending list is append-only between ticks; a tick sends the newest
//! entry and discards the rest.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, trace};

use crate::client::topic::{Payload, TopicTarget};
use crate::telemetry::metrics;

/// An entry waiting for the next tick
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub target: TopicTarget,
    pub payload: Payload,
}

pub struct OutboundThrottle {
    period: Duration,
    pending: Arc<Mutex<Vec<QueuedMessage>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    ticks: Arc<AtomicU64>,
}

impl OutboundThrottle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            pending: Arc::new(Mutex::new(Vec::new())),
            timer: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a message for the next tick. Never blocks on the transport.
    pub fn enqueue(&self, target: TopicTarget, payload: Payload) {
        self.pending.lock().push(QueuedMessage { target, payload });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Take the newest entry and clear the whole list
    pub fn drain(&self) -> Option<QueuedMessage> {
        take_latest(&self.pending)
    }

    /// Start the tick timer, replacing any running one.
    ///
    /// `on_drain` runs on the timer task once per tick that found pending
    /// entries. Returns false when no async runtime is available.
    pub fn start<F>(&self, on_drain: F) -> bool
    where
        F: Fn(QueuedMessage) + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start throttle timer: {}", e);
                return false;
            }
        };

        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            debug!("Cancelling previous throttle timer");
            previous.abort();
        }

        let period = self.period;
        let pending = self.pending.clone();
        let ticks = self.ticks.clone();

        *timer = Some(runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                ticks.fetch_add(1, Ordering::Relaxed);
                if let Some(message) = take_latest(&pending) {
                    on_drain(message);
                }
            }
        }));
        debug!("Throttle timer started ({:?})", period);
        true
    }

    /// Cancel the tick timer. Sends already dispatched are not affected.
    pub fn stop(&self) -> bool {
        match self.timer.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("Throttle timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Ticks fired since construction, across all timers
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for OutboundThrottle {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

fn take_latest(pending: &Mutex<Vec<QueuedMessage>>) -> Option<QueuedMessage> {
    let mut pending = pending.lock();
    let latest = pending.pop()?;
    let superseded = pending.len();
    pending.clear();
    drop(pending);

    if superseded > 0 {
        trace!("Coalesced {} queued messages", superseded);
    }
    metrics::record_coalesced(superseded);
    Some(latest)
}
