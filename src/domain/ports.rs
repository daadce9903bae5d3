//! Domain Ports - Core trait definitions for the driver starter
//!
//! These traits define the boundaries between the supervisor and its external
//! collaborators: cluster state reads, change notifications, driver runners
//! and status reporting. Adapters implement these traits to provide concrete
//! functionality.

use crate::domain::platform::{DriverObservedState, FeatureGateSnapshot, PlatformSnapshot};
use crate::driver::DriverConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Cluster State Port
// =============================================================================

/// Port for reading the cluster state the admission predicate needs
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Current infrastructure status
    async fn platform_status(&self) -> Result<PlatformSnapshot>;

    /// Current feature gate snapshot
    async fn feature_gates(&self) -> Result<Arc<FeatureGateSnapshot>>;

    /// Observed state of one driver.
    ///
    /// Fails with a no-match error when the driver's resource kind is not
    /// installed in the cluster yet.
    async fn driver_state(&self, driver_name: &str) -> Result<DriverObservedState>;
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Which kind of cluster object changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSource {
    Infrastructure,
    FeatureGate,
    CsiDriver,
    ClusterCsiDriver,
    Manual,
}

impl std::fmt::Display for NoticeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoticeSource::Infrastructure => write!(f, "infrastructure"),
            NoticeSource::FeatureGate => write!(f, "featuregate"),
            NoticeSource::CsiDriver => write!(f, "csidriver"),
            NoticeSource::ClusterCsiDriver => write!(f, "clustercsidriver"),
            NoticeSource::Manual => write!(f, "manual"),
        }
    }
}

/// "Something relevant changed" - carries no state, only a hint of origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    pub source: NoticeSource,
}

impl ChangeNotice {
    pub fn new(source: NoticeSource) -> Self {
        Self { source }
    }
}

// =============================================================================
// Driver Runner Ports
// =============================================================================

/// Independently start/stoppable unit reconciling one driver
#[async_trait]
pub trait DriverRunner: Send {
    /// Run until `cancel` fires. Must observe cancellation promptly and
    /// terminate on its own; it is never forcibly killed.
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<()>;
}

/// Port for constructing runners from static driver configuration
pub trait RunnerFactory: Send + Sync {
    /// Build a runner. May read the driver's static assets but must not
    /// mutate the cluster.
    fn new_runner(&self, config: &DriverConfig) -> Result<Box<dyn DriverRunner>>;
}

// =============================================================================
// Status Reporting Port
// =============================================================================

/// Per-driver lifecycle and decision events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverEvent {
    /// A runner was launched
    Started { driver: String },

    /// A runner was asked to stop
    Stopped { driver: String },

    /// The driver is not admitted and not running
    Vetoed { driver: String },

    /// Evaluation or launch failed; the driver keeps its previous state
    Failed { driver: String, reason: String },

    /// A runner ended without being asked to
    Exited { driver: String },

    /// A cancelled runner is still draining past the grace period
    SlowShutdown { driver: String },
}

impl DriverEvent {
    /// Get the driver name associated with this event
    pub fn driver(&self) -> &str {
        match self {
            DriverEvent::Started { driver } => driver,
            DriverEvent::Stopped { driver } => driver,
            DriverEvent::Vetoed { driver } => driver,
            DriverEvent::Failed { driver, .. } => driver,
            DriverEvent::Exited { driver } => driver,
            DriverEvent::SlowShutdown { driver } => driver,
        }
    }

    /// Short machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            DriverEvent::Started { .. } => "DriverStarted",
            DriverEvent::Stopped { .. } => "DriverStopped",
            DriverEvent::Vetoed { .. } => "DriverNotAdmitted",
            DriverEvent::Failed { .. } => "DriverEvaluationFailed",
            DriverEvent::Exited { .. } => "DriverExited",
            DriverEvent::SlowShutdown { .. } => "DriverSlowShutdown",
        }
    }

    /// Check if this event changes the running set
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            DriverEvent::Started { .. } | DriverEvent::Stopped { .. } | DriverEvent::Exited { .. }
        )
    }
}

/// An event with the time it was observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: DriverEvent,
    pub observed_at: DateTime<Utc>,
}

/// Fire-and-forget sink for driver events. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn report(&self, event: DriverEvent);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterStateRef = Arc<dyn ClusterState>;
pub type RunnerFactoryRef = Arc<dyn RunnerFactory>;
pub type StatusSinkRef = Arc<dyn StatusSink>;
