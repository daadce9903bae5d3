//! Status Reporting
//!
//! Sinks for per-driver decision and lifecycle events. All sinks are
//! fire-and-forget: reporting never blocks the reconciliation pass.

use crate::domain::ports::{DriverEvent, EventRecord, StatusSink, StatusSinkRef};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default number of events kept by [`EventRecorder`]
pub const DEFAULT_HISTORY: usize = 256;

// =============================================================================
// Event Recorder
// =============================================================================

/// Keeps a bounded history of events and fans them out to subscribers
pub struct EventRecorder {
    history: Mutex<VecDeque<EventRecord>>,
    capacity: usize,
    event_tx: broadcast::Sender<EventRecord>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            event_tx,
        }
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.event_tx.subscribe()
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<DriverEvent> {
        self.history.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Recorded events for one driver, oldest first
    pub fn events_for(&self, driver: &str) -> Vec<DriverEvent> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.event.driver() == driver)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Most recent event for one driver
    pub fn last_for(&self, driver: &str) -> Option<DriverEvent> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.event.driver() == driver)
            .map(|r| r.event.clone())
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for EventRecorder {
    fn report(&self, event: DriverEvent) {
        let record = EventRecord {
            event,
            observed_at: Utc::now(),
        };

        {
            let mut history = self.history.lock();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        // No subscribers is fine
        let _ = self.event_tx.send(record);
    }
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Logs every event; vetoes at debug since they repeat on every pass
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn report(&self, event: DriverEvent) {
        match &event {
            DriverEvent::Started { driver } => info!(driver = %driver, "Starting CSI driver operator"),
            DriverEvent::Stopped { driver } => info!(driver = %driver, "Stopping CSI driver operator"),
            DriverEvent::Vetoed { driver } => debug!(driver = %driver, "CSI driver not admitted"),
            DriverEvent::Failed { driver, reason } => {
                warn!(driver = %driver, reason = %reason, "CSI driver evaluation failed")
            }
            DriverEvent::Exited { driver } => {
                warn!(driver = %driver, "CSI driver operator exited unexpectedly")
            }
            DriverEvent::SlowShutdown { driver } => {
                warn!(driver = %driver, "CSI driver operator exceeded shutdown grace period")
            }
        }
    }
}

// =============================================================================
// Fanout Sink
// =============================================================================

/// Forwards every event to each inner sink
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<StatusSinkRef>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<StatusSinkRef>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: StatusSinkRef) {
        self.sinks.push(sink);
    }
}

impl StatusSink for FanoutSink {
    fn report(&self, event: DriverEvent) {
        for sink in &self.sinks {
            sink.report(event.clone());
        }
    }
}
