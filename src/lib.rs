//! CSI Driver Starter
//!
//! Supervisor that decides which platform-specific CSI driver operators should
//! run in a cluster and keeps exactly that set running as platform status,
//! feature gates and installed drivers change.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Driver Starter                               │
//! │                                                                       │
//! │   watchers ──► notices ──┐                                            │
//! │   resync timer ──────────┼──► sync pass ──► RunningSet ──► runners    │
//! │   retry backoff ─────────┘        │                                   │
//! │                                   ▼                                   │
//! │                           admission predicate                         │
//! │                  (feature gate, platform, status filter)              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                          Cluster State                                │
//! │   Infrastructure · FeatureGate · CSIDriver · ClusterCSIDriver         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`starter`]: The supervisor, running set and status sinks
//! - [`driver`]: Driver descriptors, catalog, admission and runners
//! - [`cluster`]: Cluster state adapters and change watchers
//! - [`crd`]: Custom resources read from the cluster
//! - [`domain`]: Snapshot types and ports
//! - [`error`]: Error types and classification

pub mod cluster;
pub mod crd;
pub mod domain;
pub mod driver;
pub mod error;
pub mod starter;

// Re-export commonly used types
pub use cluster::{notice_channel, spawn_watchers, InMemoryClusterState, KubeClusterState};

pub use domain::platform::{
    AzureCloudEnvironment, DriverObject, DriverObservedState, FeatureGateSnapshot,
    PlatformSnapshot, PlatformStatus, PlatformType,
};

pub use domain::ports::{
    ChangeNotice, ClusterState, DriverEvent, DriverRunner, NoticeSource, RunnerFactory,
    StatusSink,
};

pub use driver::{
    builtin_drivers, should_run, Applicability, AssetRunnerFactory, DriverConfig, Flavor,
    StatusFilter,
};

pub use error::{is_no_match_error, Error, ErrorAction, Result};

pub use starter::{
    DriverStarter, EventRecorder, FanoutSink, StarterConfig, StarterMetrics, StarterView,
    SyncReport, TracingSink,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
