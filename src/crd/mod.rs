//! Custom Resource Definitions read by the driver starter
//!
//! This module contains the cluster objects the starter consumes:
//! - Infrastructure: platform type and platform-specific status
//! - FeatureGate: enabled/disabled gates per release version
//! - ClusterCSIDriver: per-driver operator status (may not be installed yet)

pub mod cluster_csi_driver;
pub mod feature_gate;
pub mod infrastructure;

pub use cluster_csi_driver::*;
pub use feature_gate::*;
pub use infrastructure::*;
