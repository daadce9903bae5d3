//! Driver Starter
//!
//! The supervisor that owns the running set. Each reconciliation pass reads
//! platform status, feature gates and per-driver observed state, evaluates
//! admission for every configured driver and starts or stops runners so the
//! running set matches the admitted set.
//!
//! ```text
//!   notices ──┐
//!   resync ───┼──► sync() ──► should_run() ──► RunningSet ──► StatusSink
//!   retry ────┘
//! ```

pub mod metrics;
pub mod running;
pub mod status;

pub use metrics::StarterMetrics;
pub use running::{RunnerHandle, RunningSet};
pub use status::{EventRecorder, FanoutSink, TracingSink, DEFAULT_HISTORY};

use crate::domain::platform::{DriverObservedState, FeatureGateSnapshot, PlatformSnapshot};
use crate::domain::ports::{
    ChangeNotice, ClusterStateRef, DriverEvent, NoticeSource, RunnerFactoryRef, StatusSinkRef,
};
use crate::driver::{should_run, validate_unique, DriverConfig};
use crate::error::{Error, ErrorAction, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct StarterConfig {
    /// Periodic full pass regardless of notices
    pub resync_interval: Duration,

    /// How long stopped runners get to finish
    pub shutdown_grace_period: Duration,

    /// First retry delay after a pass with transient errors
    pub retry_initial: Duration,

    /// Retry delay cap
    pub retry_max: Duration,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(20 * 60),
            shutdown_grace_period: Duration::from_secs(30),
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(5 * 60),
        }
    }
}

// =============================================================================
// Pass Results
// =============================================================================

/// A driver left in its previous state because evaluating it failed
#[derive(Debug)]
pub struct SkippedDriver {
    pub driver: String,
    pub error: Error,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedDriver>,

    /// Admitted, but the previous runner is still shutting down
    pub deferred: Vec<String>,

    /// Platform or feature gate read failure; no driver changed state
    pub pass_error: Option<Error>,
}

impl SyncReport {
    /// Check if the running set changed
    pub fn changed(&self) -> bool {
        !self.started.is_empty() || !self.stopped.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.pass_error.is_none() && self.skipped.is_empty()
    }

    /// The most urgent retry any error or deferred launch of this pass asks for
    pub fn retry_action(&self) -> Option<ErrorAction> {
        if !self.deferred.is_empty() {
            return Some(ErrorAction::RequeueWithBackoff);
        }

        let mut after: Option<Duration> = None;
        let errors = self
            .pass_error
            .iter()
            .chain(self.skipped.iter().map(|s| &s.error));

        for error in errors {
            match error.action() {
                ErrorAction::RequeueWithBackoff => return Some(ErrorAction::RequeueWithBackoff),
                ErrorAction::RequeueAfter(delay) => {
                    after = Some(after.map_or(delay, |d| d.min(delay)));
                }
                ErrorAction::NoRequeue => {}
            }
        }
        after.map(ErrorAction::RequeueAfter)
    }

    pub fn needs_retry(&self) -> bool {
        self.retry_action().is_some()
    }
}

/// Read-only snapshot published after every pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StarterView {
    /// Completed passes, including failed ones
    pub passes: u64,
    pub running: BTreeSet<String>,
}

/// What woke the supervisor loop
#[derive(Debug)]
enum Trigger {
    Shutdown,
    Resync,
    Retry,
    Notice(NoticeSource),
    NoticesClosed,
}

// =============================================================================
// Driver Starter
// =============================================================================

/// Starts and stops driver runners from live cluster state
pub struct DriverStarter {
    config: StarterConfig,
    drivers: Vec<DriverConfig>,
    cluster: ClusterStateRef,
    notices: mpsc::Receiver<ChangeNotice>,
    runners: RunnerFactoryRef,
    sink: StatusSinkRef,
    running: RunningSet,
    view_tx: watch::Sender<StarterView>,
    passes: u64,
}

impl DriverStarter {
    /// Create a starter; fails if two drivers share a name
    pub fn new(
        config: StarterConfig,
        drivers: Vec<DriverConfig>,
        cluster: ClusterStateRef,
        notices: mpsc::Receiver<ChangeNotice>,
        runners: RunnerFactoryRef,
        sink: StatusSinkRef,
    ) -> Result<Self> {
        validate_unique(&drivers)?;
        let (view_tx, _) = watch::channel(StarterView::default());

        Ok(Self {
            running: RunningSet::new(config.shutdown_grace_period),
            config,
            drivers,
            cluster,
            notices,
            runners,
            sink,
            view_tx,
            passes: 0,
        })
    }

    pub fn configured_drivers(&self) -> &[DriverConfig] {
        &self.drivers
    }

    /// Receiver of the view published after each pass
    pub fn running_view(&self) -> watch::Receiver<StarterView> {
        self.view_tx.subscribe()
    }

    /// Run one reconciliation pass
    pub async fn sync(&mut self) -> SyncReport {
        let mut report = SyncReport::default();

        self.running.reap(self.sink.as_ref());
        for driver in self.running.take_exited() {
            self.sink.report(DriverEvent::Exited { driver });
        }

        let (platform, gates) = match self.read_cluster().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "Failed to read cluster state, keeping running drivers as they are");
                report.pass_error = Some(e);
                self.publish();
                return report;
            }
        };

        for config in &self.drivers {
            let name = config.driver_name.as_str();

            let observed = match self.cluster.driver_state(name).await {
                Ok(observed) => observed,
                Err(e) if e.is_no_match() => {
                    debug!(driver = %name, error = %e, "Driver kind not served yet, treating as absent");
                    DriverObservedState::absent()
                }
                Err(e) => {
                    self.sink.report(DriverEvent::Failed {
                        driver: name.to_string(),
                        reason: e.to_string(),
                    });
                    report.skipped.push(SkippedDriver {
                        driver: name.to_string(),
                        error: e,
                    });
                    continue;
                }
            };

            let admitted = match should_run(
                config,
                &platform,
                &gates,
                observed.object.as_ref(),
                observed.already_installed,
            ) {
                Ok(admitted) => admitted,
                Err(e) => {
                    self.sink.report(DriverEvent::Failed {
                        driver: name.to_string(),
                        reason: e.to_string(),
                    });
                    report.skipped.push(SkippedDriver {
                        driver: name.to_string(),
                        error: e,
                    });
                    continue;
                }
            };

            match (admitted, self.running.contains(name)) {
                (true, true) => report.unchanged.push(name.to_string()),
                (true, false) if self.running.is_draining(name) => {
                    debug!(driver = %name, "Previous runner still shutting down, deferring start");
                    report.deferred.push(name.to_string());
                }
                (true, false) => {
                    let launched = self
                        .runners
                        .new_runner(config)
                        .map_err(|e| Error::Runner {
                            driver: name.to_string(),
                            reason: e.to_string(),
                        })
                        .and_then(|runner| self.running.launch(name, runner));
                    match launched {
                        Ok(()) => {
                            self.sink.report(DriverEvent::Started {
                                driver: name.to_string(),
                            });
                            report.started.push(name.to_string());
                        }
                        Err(e) => {
                            self.sink.report(DriverEvent::Failed {
                                driver: name.to_string(),
                                reason: e.to_string(),
                            });
                            report.skipped.push(SkippedDriver {
                                driver: name.to_string(),
                                error: e,
                            });
                        }
                    }
                }
                (false, true) => {
                    self.running.stop(name);
                    self.sink.report(DriverEvent::Stopped {
                        driver: name.to_string(),
                    });
                    report.stopped.push(name.to_string());
                }
                (false, false) => {
                    self.sink.report(DriverEvent::Vetoed {
                        driver: name.to_string(),
                    });
                    report.unchanged.push(name.to_string());
                }
            }
        }

        if report.changed() {
            info!(
                started = ?report.started,
                stopped = ?report.stopped,
                running = self.running.len(),
                "Driver set changed"
            );
        }

        self.publish();
        report
    }

    async fn read_cluster(&self) -> Result<(PlatformSnapshot, Arc<FeatureGateSnapshot>)> {
        let (platform, gates) =
            tokio::join!(self.cluster.platform_status(), self.cluster.feature_gates());
        match (platform, gates) {
            (Ok(platform), Ok(gates)) => Ok((platform, gates)),
            (platform, gates) => {
                let errors = [platform.err(), gates.err()].into_iter().flatten().collect();
                Err(Error::aggregate(errors)
                    .unwrap_or_else(|| Error::Internal("cluster read failed".to_string())))
            }
        }
    }

    fn publish(&mut self) {
        self.passes += 1;
        self.view_tx.send_replace(StarterView {
            passes: self.passes,
            running: self.running.names(),
        });
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_initial)
            .with_max_interval(self.config.retry_max)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Supervise until `shutdown` fires, then stop every runner
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            drivers = self.drivers.len(),
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting CSI driver starter"
        );

        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = self.retry_backoff();
        let mut retry_at: Option<Instant> = None;
        let mut notices_open = true;

        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => Trigger::Shutdown,
                _ = resync.tick() => Trigger::Resync,
                notice = self.notices.recv(), if notices_open => match notice {
                    Some(notice) => Trigger::Notice(notice.source),
                    None => Trigger::NoticesClosed,
                },
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    Trigger::Retry
                }
            };

            match trigger {
                Trigger::Shutdown => break,
                Trigger::NoticesClosed => {
                    warn!("Change notice channel closed, relying on periodic resync");
                    notices_open = false;
                    continue;
                }
                Trigger::Notice(source) => debug!(source = %source, "Change notice received"),
                Trigger::Resync => debug!("Periodic resync"),
                Trigger::Retry => debug!("Retrying after failed pass"),
            }

            // Queued notices are covered by this pass
            while self.notices.try_recv().is_ok() {}

            let report = self.sync().await;
            retry_at = match report.retry_action() {
                Some(ErrorAction::RequeueWithBackoff) => {
                    let delay = backoff.next_backoff().unwrap_or(self.config.retry_max);
                    debug!(delay_ms = delay.as_millis() as u64, "Scheduling retry");
                    Some(Instant::now() + delay)
                }
                Some(ErrorAction::RequeueAfter(delay)) => Some(Instant::now() + delay),
                Some(ErrorAction::NoRequeue) | None => {
                    backoff.reset();
                    None
                }
            };
        }

        info!(running = self.running.len(), "Shutting down CSI driver starter");
        for driver in self.running.names() {
            self.sink.report(DriverEvent::Stopped { driver });
        }
        self.running.shutdown(self.sink.as_ref()).await;
        self.publish();
        Ok(())
    }
}
