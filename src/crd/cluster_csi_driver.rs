//! ClusterCSIDriver CRD (operator.openshift.io/v1)
//!
//! One cluster-scoped object per CSI driver, named after the driver. Its
//! status conditions tell whether the driver's controller has completed an
//! installation, which makes the driver sticky once installed.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CLUSTER_CSI_DRIVER_GROUP: &str = "operator.openshift.io";
pub const CLUSTER_CSI_DRIVER_VERSION: &str = "v1";
pub const CLUSTER_CSI_DRIVER_KIND: &str = "ClusterCSIDriver";

/// Condition type suffix reported by driver controllers once installed
const AVAILABLE_SUFFIX: &str = "Available";

// =============================================================================
// ClusterCSIDriver CRD
// =============================================================================

/// ClusterCSIDriver configures and reports on one CSI driver operator
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "ClusterCSIDriverStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpec {
    /// Managed, Unmanaged or Removed
    #[serde(default)]
    pub management_state: Option<String>,

    #[serde(default)]
    pub log_level: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverStatus {
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Operator condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: String,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Implementations
// =============================================================================

impl ClusterCSIDriver {
    /// Check if the driver's controller has reported a successful install
    pub fn is_installed(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status
                .conditions
                .iter()
                .any(|c| c.r#type.ends_with(AVAILABLE_SUFFIX) && c.status == "True")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(conditions: Vec<(&str, &str)>) -> ClusterCSIDriver {
        let mut driver = ClusterCSIDriver::new("ebs.csi.aws.com", ClusterCSIDriverSpec::default());
        driver.status = Some(ClusterCSIDriverStatus {
            conditions: conditions
                .into_iter()
                .map(|(t, s)| OperatorCondition {
                    r#type: t.to_string(),
                    status: s.to_string(),
                    last_transition_time: None,
                    reason: None,
                    message: None,
                })
                .collect(),
            observed_generation: Some(1),
        });
        driver
    }

    #[test]
    fn test_installed_when_available() {
        let driver = driver_with(vec![
            ("AWSEBSDriverControllerServiceControllerAvailable", "True"),
            ("AWSEBSDriverControllerServiceControllerProgressing", "False"),
        ]);
        assert!(driver.is_installed());
    }

    #[test]
    fn test_not_installed() {
        assert!(!driver_with(vec![("AWSEBSDriverControllerServiceControllerAvailable", "False")]).is_installed());
        assert!(!driver_with(vec![]).is_installed());
        assert!(!ClusterCSIDriver::new("x", ClusterCSIDriverSpec::default()).is_installed());
    }
}
