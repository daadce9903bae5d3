//! Running Set
//!
//! Handles of the driver runners the supervisor has launched. Owned
//! exclusively by the supervisor task, so it needs no locking. Stopped runners
//! move to a draining list until their task finishes.

use crate::domain::ports::{DriverEvent, DriverRunner, StatusSink};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cancellation token and task of one launched runner
pub struct RunnerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    started_at: Instant,
}

impl RunnerHandle {
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A cancelled runner that has not finished yet
struct Draining {
    driver: String,
    task: JoinHandle<()>,
    deadline: Instant,
    reported: bool,
}

/// At most one handle per driver name
pub struct RunningSet {
    handles: BTreeMap<String, RunnerHandle>,
    draining: Vec<Draining>,
    grace: Duration,
}

impl RunningSet {
    pub fn new(grace: Duration) -> Self {
        Self {
            handles: BTreeMap::new(),
            draining: Vec::new(),
            grace,
        }
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.handles.contains_key(driver)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Runners cancelled but still finishing
    pub fn draining_len(&self) -> usize {
        self.draining.len()
    }

    /// Check if a cancelled runner for `driver` is still finishing
    pub fn is_draining(&self, driver: &str) -> bool {
        self.draining.iter().any(|d| d.driver == driver)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.handles.keys().cloned().collect()
    }

    /// Spawn `runner` for `driver`. Refused while a previous runner for the
    /// same driver is running or still draining.
    pub fn launch(&mut self, driver: &str, runner: Box<dyn DriverRunner>) -> Result<()> {
        if self.contains(driver) {
            return Err(Error::Internal(format!(
                "driver {} already has a running handle",
                driver
            )));
        }
        if self.is_draining(driver) {
            return Err(Error::Internal(format!(
                "driver {} is still shutting down",
                driver
            )));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = driver.to_string();
        let task = tokio::spawn(async move {
            match runner.run(token).await {
                Ok(()) => debug!(driver = %name, "Driver runner returned"),
                Err(e) => warn!(driver = %name, error = %e, "Driver runner failed"),
            }
        });

        self.handles.insert(
            driver.to_string(),
            RunnerHandle {
                cancel,
                task,
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Signal cancellation without waiting for the runner to finish
    pub fn stop(&mut self, driver: &str) -> bool {
        let Some(handle) = self.handles.remove(driver) else {
            return false;
        };

        debug!(
            driver = %driver,
            uptime_secs = handle.uptime().as_secs(),
            "Cancelling driver runner"
        );
        handle.cancel.cancel();
        self.draining.push(Draining {
            driver: driver.to_string(),
            task: handle.task,
            deadline: Instant::now() + self.grace,
            reported: false,
        });
        true
    }

    /// Forget finished draining runners; report ones past the grace period once
    pub fn reap(&mut self, sink: &dyn StatusSink) {
        let now = Instant::now();
        self.draining.retain_mut(|draining| {
            if draining.task.is_finished() {
                return false;
            }
            if !draining.reported && now >= draining.deadline {
                draining.reported = true;
                sink.report(DriverEvent::SlowShutdown {
                    driver: draining.driver.clone(),
                });
            }
            true
        });
    }

    /// Remove runners that ended without being cancelled
    pub fn take_exited(&mut self) -> Vec<String> {
        let exited: Vec<String> = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &exited {
            self.handles.remove(name);
        }
        exited
    }

    /// Cancel everything and wait, bounded by the grace period, for all
    /// runners to finish. Stragglers are reported, never aborted.
    pub async fn shutdown(&mut self, sink: &dyn StatusSink) {
        let names: Vec<String> = self.handles.keys().cloned().collect();
        for name in names {
            self.stop(&name);
        }

        let mut draining = std::mem::take(&mut self.draining);
        if draining.is_empty() {
            return;
        }
        debug!(count = draining.len(), "Waiting for driver runners to finish");

        let wait = futures::future::join_all(draining.iter_mut().map(|d| &mut d.task));
        if tokio::time::timeout(self.grace, wait).await.is_err() {
            for straggler in draining.iter().filter(|d| !d.task.is_finished()) {
                sink.report(DriverEvent::SlowShutdown {
                    driver: straggler.driver.clone(),
                });
            }
        }
    }
}

impl Drop for RunningSet {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.cancel.cancel();
        }
    }
}
