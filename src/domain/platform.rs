//! Cluster Snapshot Types
//!
//! Immutable, point-in-time views of the cluster state the admission
//! predicate evaluates: platform identity, feature gates and the observed
//! state of each driver.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::str::FromStr;

/// Annotation the operator puts on every CSIDriver object it manages
pub const MANAGED_ANNOTATION: &str = "csi.openshift.io/managed";

// =============================================================================
// Platform Type
// =============================================================================

/// Infrastructure provider classification of the cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlatformType {
    AWS,
    Azure,
    GCP,
    VSphere,
    OpenStack,
    Ovirt,
    IBMCloud,
    PowerVS,
    AlibabaCloud,
    Nutanix,
    BareMetal,
    None,
    External,
    /// A platform this build does not know about
    Unrecognized(String),
}

impl PlatformType {
    /// Check if this is a platform this build knows how to compare
    pub fn is_recognized(&self) -> bool {
        !matches!(self, PlatformType::Unrecognized(_))
    }
}

impl FromStr for PlatformType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AWS" => PlatformType::AWS,
            "Azure" => PlatformType::Azure,
            "GCP" => PlatformType::GCP,
            "VSphere" => PlatformType::VSphere,
            "OpenStack" => PlatformType::OpenStack,
            "oVirt" => PlatformType::Ovirt,
            "IBMCloud" => PlatformType::IBMCloud,
            "PowerVS" => PlatformType::PowerVS,
            "AlibabaCloud" => PlatformType::AlibabaCloud,
            "Nutanix" => PlatformType::Nutanix,
            "BareMetal" => PlatformType::BareMetal,
            "None" => PlatformType::None,
            "External" => PlatformType::External,
            other => PlatformType::Unrecognized(other.to_string()),
        })
    }
}

impl From<&str> for PlatformType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(platform) => platform,
            Err(never) => match never {},
        }
    }
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformType::AWS => write!(f, "AWS"),
            PlatformType::Azure => write!(f, "Azure"),
            PlatformType::GCP => write!(f, "GCP"),
            PlatformType::VSphere => write!(f, "VSphere"),
            PlatformType::OpenStack => write!(f, "OpenStack"),
            PlatformType::Ovirt => write!(f, "oVirt"),
            PlatformType::IBMCloud => write!(f, "IBMCloud"),
            PlatformType::PowerVS => write!(f, "PowerVS"),
            PlatformType::AlibabaCloud => write!(f, "AlibabaCloud"),
            PlatformType::Nutanix => write!(f, "Nutanix"),
            PlatformType::BareMetal => write!(f, "BareMetal"),
            PlatformType::None => write!(f, "None"),
            PlatformType::External => write!(f, "External"),
            PlatformType::Unrecognized(name) => write!(f, "{}", name),
        }
    }
}

// =============================================================================
// Platform Status
// =============================================================================

/// Azure cloud environment the cluster runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AzureCloudEnvironment {
    PublicCloud,
    USGovernmentCloud,
    ChinaCloud,
    GermanCloud,
    StackCloud,
    Other(String),
}

impl From<&str> for AzureCloudEnvironment {
    fn from(s: &str) -> Self {
        match s {
            "AzurePublicCloud" => AzureCloudEnvironment::PublicCloud,
            "AzureUSGovernmentCloud" => AzureCloudEnvironment::USGovernmentCloud,
            "AzureChinaCloud" => AzureCloudEnvironment::ChinaCloud,
            "AzureGermanCloud" => AzureCloudEnvironment::GermanCloud,
            "AzureStackCloud" => AzureCloudEnvironment::StackCloud,
            other => AzureCloudEnvironment::Other(other.to_string()),
        }
    }
}

/// Azure-specific platform status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzurePlatformStatus {
    pub cloud_name: AzureCloudEnvironment,
}

/// Platform type plus platform-specific sub-status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub platform_type: PlatformType,
    pub azure: Option<AzurePlatformStatus>,
}

impl PlatformStatus {
    pub fn new(platform_type: PlatformType) -> Self {
        Self {
            platform_type,
            azure: None,
        }
    }

    /// Azure status with the given cloud environment
    pub fn azure(cloud_name: AzureCloudEnvironment) -> Self {
        Self {
            platform_type: PlatformType::Azure,
            azure: Some(AzurePlatformStatus { cloud_name }),
        }
    }

    /// Check if the cluster runs on Azure Stack Hub
    pub fn is_azure_stack_cloud(&self) -> bool {
        self.platform_type == PlatformType::Azure
            && matches!(
                self.azure,
                Some(AzurePlatformStatus {
                    cloud_name: AzureCloudEnvironment::StackCloud
                })
            )
    }
}

/// The cluster's current infrastructure status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    /// Absent until the installer has populated the infrastructure status
    pub platform_status: Option<PlatformStatus>,
}

impl PlatformSnapshot {
    pub fn new(status: PlatformStatus) -> Self {
        Self {
            platform_status: Some(status),
        }
    }

    pub fn of(platform_type: PlatformType) -> Self {
        Self::new(PlatformStatus::new(platform_type))
    }

    pub fn platform_type(&self) -> Option<&PlatformType> {
        self.platform_status.as_ref().map(|s| &s.platform_type)
    }
}

// =============================================================================
// Feature Gates
// =============================================================================

/// Point-in-time view of the cluster's feature gates.
///
/// Gates unknown to the snapshot are reported as disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGateSnapshot {
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
}

impl FeatureGateSnapshot {
    pub fn new<E, D>(enabled: E, disabled: D) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let enabled: BTreeSet<String> = enabled.into_iter().map(Into::into).collect();
        let disabled = disabled
            .into_iter()
            .map(Into::into)
            .filter(|name| !enabled.contains(name))
            .collect();
        Self { enabled, disabled }
    }

    pub fn enabled(&self, gate: &str) -> bool {
        self.enabled.contains(gate)
    }

    pub fn is_known(&self, gate: &str) -> bool {
        self.enabled.contains(gate) || self.disabled.contains(gate)
    }

    pub fn enabled_gates(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}

// =============================================================================
// Driver Observed State
// =============================================================================

/// Cluster-visible CSIDriver object of a driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverObject {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

impl DriverObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Object as created by this operator
    pub fn managed(name: impl Into<String>) -> Self {
        let mut object = Self::new(name);
        object
            .annotations
            .insert(MANAGED_ANNOTATION.to_string(), "true".to_string());
        object
    }

    /// Check if the object carries the operator's managed annotation
    pub fn is_managed(&self) -> bool {
        self.annotations.contains_key(MANAGED_ANNOTATION)
    }
}

/// Per-driver observed facts, recomputed on every pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverObservedState {
    pub object: Option<DriverObject>,
    /// Driver's controller has reported a successful installation before
    pub already_installed: bool,
}

impl DriverObservedState {
    /// Nothing in the cluster yet
    pub fn absent() -> Self {
        Self::default()
    }
}
