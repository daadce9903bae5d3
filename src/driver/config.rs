//! Driver Configuration
//!
//! Static, immutable per-driver descriptors created once at startup.

use crate::domain::platform::{PlatformStatus, PlatformType};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// Applicability
// =============================================================================

/// Which platforms a driver may run on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Applicability {
    AllPlatforms,
    Platform(PlatformType),
}

impl std::fmt::Display for Applicability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Applicability::AllPlatforms => write!(f, "all platforms"),
            Applicability::Platform(platform) => write!(f, "{}", platform),
        }
    }
}

// =============================================================================
// Status Filter
// =============================================================================

/// Named platform-variant policies consulted after the platform check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFilter {
    /// Always admit
    Always,
    /// Never admit
    Never,
    /// Deny a fresh install on Azure Stack Hub, keep an installed driver running
    NotAzureStackCloud,
}

impl StatusFilter {
    /// Evaluate the filter against the platform sub-status
    pub fn evaluate(&self, status: Option<&PlatformStatus>, already_installed: bool) -> bool {
        match self {
            StatusFilter::Always => true,
            StatusFilter::Never => false,
            StatusFilter::NotAzureStackCloud => {
                if already_installed {
                    return true;
                }
                !status.is_some_and(PlatformStatus::is_azure_stack_cloud)
            }
        }
    }
}

// =============================================================================
// Driver Assets
// =============================================================================

/// References to the driver operator's manifests, relative to the assets root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverAssets {
    /// Deployment of the driver operator
    pub deployment: String,
    /// Glob patterns of the static objects (RBAC, service accounts, ...)
    pub static_assets: Vec<String>,
}

// =============================================================================
// Driver Config
// =============================================================================

/// Static descriptor of one CSI driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// CSI driver name, unique key
    pub driver_name: String,
    pub applicability: Applicability,
    /// Tech preview drivers stay inert until this gate is enabled
    pub require_feature_gate: Option<String>,
    pub status_filter: Option<StatusFilter>,
    pub assets: DriverAssets,
}

impl DriverConfig {
    /// Driver restricted to one platform
    pub fn for_platform(driver_name: impl Into<String>, platform: PlatformType) -> Self {
        Self {
            driver_name: driver_name.into(),
            applicability: Applicability::Platform(platform),
            require_feature_gate: None,
            status_filter: None,
            assets: DriverAssets::default(),
        }
    }

    /// Driver that runs everywhere
    pub fn for_all_platforms(driver_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            applicability: Applicability::AllPlatforms,
            require_feature_gate: None,
            status_filter: None,
            assets: DriverAssets::default(),
        }
    }

    pub fn with_feature_gate(mut self, gate: impl Into<String>) -> Self {
        self.require_feature_gate = Some(gate.into());
        self
    }

    pub fn with_status_filter(mut self, filter: StatusFilter) -> Self {
        self.status_filter = Some(filter);
        self
    }

    pub fn with_assets(mut self, assets: DriverAssets) -> Self {
        self.assets = assets;
        self
    }

    pub fn is_tech_preview(&self) -> bool {
        self.require_feature_gate.is_some()
    }
}

/// Reject driver sets that reuse a driver name
pub fn validate_unique(drivers: &[DriverConfig]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for driver in drivers {
        if driver.driver_name.is_empty() {
            return Err(Error::Configuration("driver with empty name".to_string()));
        }
        if !seen.insert(driver.driver_name.as_str()) {
            return Err(Error::Configuration(format!(
                "driver {} configured more than once",
                driver.driver_name
            )));
        }
    }
    Ok(())
}
