//! Infrastructure CRD (config.openshift.io/v1)
//!
//! Cluster-scoped singleton named `cluster` describing the platform the
//! cluster was installed on. Only the fields the starter reads are modelled.

use crate::domain::platform::{
    AzureCloudEnvironment, AzurePlatformStatus, PlatformSnapshot, PlatformStatus, PlatformType,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton Infrastructure object
pub const INFRASTRUCTURE_NAME: &str = "cluster";

// =============================================================================
// Infrastructure CRD
// =============================================================================

/// Infrastructure holds cluster-wide information about the underlying platform
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    plural = "infrastructures",
    status = "InfrastructureStatus",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Platform-specific configuration set by the installer
    #[serde(default)]
    pub platform_spec: Option<serde_json::Value>,
}

// =============================================================================
// Status
// =============================================================================

/// Observed infrastructure state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default)]
    pub infrastructure_name: Option<String>,

    /// Platform type and platform-specific status
    #[serde(default)]
    pub platform_status: Option<PlatformStatusRecord>,
}

/// Wire form of the platform status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatusRecord {
    #[serde(default)]
    pub r#type: String,

    #[serde(default)]
    pub azure: Option<AzureStatusRecord>,
}

/// Wire form of the Azure platform status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureStatusRecord {
    #[serde(default)]
    pub cloud_name: Option<String>,

    #[serde(default)]
    pub resource_group_name: Option<String>,
}

// =============================================================================
// Implementations
// =============================================================================

impl From<&PlatformStatusRecord> for PlatformStatus {
    fn from(record: &PlatformStatusRecord) -> Self {
        let platform_type = PlatformType::from(record.r#type.as_str());
        let azure = record.azure.as_ref().map(|azure| AzurePlatformStatus {
            cloud_name: azure
                .cloud_name
                .as_deref()
                .map(AzureCloudEnvironment::from)
                .unwrap_or(AzureCloudEnvironment::PublicCloud),
        });
        PlatformStatus {
            platform_type,
            azure,
        }
    }
}

impl Infrastructure {
    /// Immutable snapshot of the platform status
    pub fn snapshot(&self) -> PlatformSnapshot {
        PlatformSnapshot {
            platform_status: self
                .status
                .as_ref()
                .and_then(|s| s.platform_status.as_ref())
                .filter(|p| !p.r#type.is_empty())
                .map(PlatformStatus::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(value: serde_json::Value) -> Infrastructure {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_snapshot_azure_stack() {
        let infra = from_json(serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "Infrastructure",
            "metadata": { "name": "cluster" },
            "spec": {},
            "status": {
                "platformStatus": {
                    "type": "Azure",
                    "azure": { "cloudName": "AzureStackCloud" }
                }
            }
        }));

        let snapshot = infra.snapshot();
        let status = snapshot.platform_status.unwrap();
        assert_eq!(status.platform_type, PlatformType::Azure);
        assert!(status.is_azure_stack_cloud());
    }

    #[test]
    fn test_snapshot_without_status() {
        let infra = from_json(serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "Infrastructure",
            "metadata": { "name": "cluster" },
            "spec": {}
        }));
        assert_eq!(infra.snapshot(), PlatformSnapshot::default());
    }

    #[test]
    fn test_azure_defaults_to_public_cloud() {
        let record = PlatformStatusRecord {
            r#type: "Azure".into(),
            azure: Some(AzureStatusRecord::default()),
        };
        let status = PlatformStatus::from(&record);
        assert_eq!(
            status.azure.unwrap().cloud_name,
            AzureCloudEnvironment::PublicCloud
        );
    }
}
