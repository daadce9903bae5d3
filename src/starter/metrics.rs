//! Starter Metrics
//!
//! Prometheus counters for driver transitions, exposed as a status sink.

use crate::domain::ports::{DriverEvent, StatusSink};
use crate::error::Result;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the driver starter
#[derive(Clone)]
pub struct StarterMetrics {
    starts: IntCounterVec,
    stops: IntCounterVec,
    failures: IntCounterVec,
    exits: IntCounterVec,
    slow_shutdowns: IntCounterVec,
    running: IntGauge,
}

impl StarterMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let counter = |name: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help), &["driver"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let metrics = Self {
            starts: counter(
                "csi_driver_starter_starts_total",
                "Driver operators started",
            )?,
            stops: counter(
                "csi_driver_starter_stops_total",
                "Driver operators stopped",
            )?,
            failures: counter(
                "csi_driver_starter_failures_total",
                "Driver evaluations or launches that failed",
            )?,
            exits: counter(
                "csi_driver_starter_unexpected_exits_total",
                "Driver operators that exited without being stopped",
            )?,
            slow_shutdowns: counter(
                "csi_driver_starter_slow_shutdowns_total",
                "Driver operators that exceeded the shutdown grace period",
            )?,
            running: IntGauge::new(
                "csi_driver_starter_running_drivers",
                "Driver operators currently running",
            )?,
        };
        registry.register(Box::new(metrics.running.clone()))?;

        Ok(metrics)
    }

    pub fn running(&self) -> i64 {
        self.running.get()
    }

    pub fn starts(&self, driver: &str) -> u64 {
        self.starts.with_label_values(&[driver]).get()
    }
}

impl StatusSink for StarterMetrics {
    fn report(&self, event: DriverEvent) {
        match &event {
            DriverEvent::Started { driver } => {
                self.starts.with_label_values(&[driver.as_str()]).inc();
                self.running.inc();
            }
            DriverEvent::Stopped { driver } => {
                self.stops.with_label_values(&[driver.as_str()]).inc();
                self.running.dec();
            }
            DriverEvent::Exited { driver } => {
                self.exits.with_label_values(&[driver.as_str()]).inc();
                self.running.dec();
            }
            DriverEvent::Failed { driver, .. } => {
                self.failures.with_label_values(&[driver.as_str()]).inc();
            }
            DriverEvent::SlowShutdown { driver } => {
                self.slow_shutdowns.with_label_values(&[driver.as_str()]).inc();
            }
            DriverEvent::Vetoed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_track_running() {
        let registry = Registry::new();
        let metrics = StarterMetrics::new(&registry).unwrap();

        metrics.report(DriverEvent::Started {
            driver: "ebs.csi.aws.com".into(),
        });
        metrics.report(DriverEvent::Started {
            driver: "pd.csi.storage.gke.io".into(),
        });
        metrics.report(DriverEvent::Stopped {
            driver: "pd.csi.storage.gke.io".into(),
        });

        assert_eq!(metrics.running(), 1);
        assert_eq!(metrics.starts("ebs.csi.aws.com"), 1);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        StarterMetrics::new(&registry).unwrap();
        assert!(StarterMetrics::new(&registry).is_err());
    }
}
