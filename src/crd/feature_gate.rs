//! FeatureGate CRD (config.openshift.io/v1)
//!
//! Cluster-scoped singleton named `cluster`. The status lists the enabled and
//! disabled gates per release version.

use crate::domain::platform::FeatureGateSnapshot;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton FeatureGate object
pub const FEATURE_GATE_NAME: &str = "cluster";

// =============================================================================
// FeatureGate CRD
// =============================================================================

/// FeatureGate selects the set of feature gates enabled in the cluster
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "FeatureGate",
    plural = "featuregates",
    status = "FeatureGateStatus",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGateSpec {
    /// Named feature set, e.g. TechPreviewNoUpgrade
    #[serde(default)]
    pub feature_set: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGateStatus {
    #[serde(default)]
    pub feature_gates: Vec<FeatureGateDetails>,
}

/// Gates in effect for one release version
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGateDetails {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enabled: Vec<FeatureGateAttributes>,
    #[serde(default)]
    pub disabled: Vec<FeatureGateAttributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGateAttributes {
    pub name: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl FeatureGate {
    /// Gate details for `version`; the first entry when no version is given.
    pub fn details_for(&self, version: Option<&str>) -> Option<&FeatureGateDetails> {
        let gates = &self.status.as_ref()?.feature_gates;
        match version {
            Some(version) => gates.iter().find(|d| d.version == version),
            None => gates.first(),
        }
    }

    /// Immutable snapshot of the gates for `version`
    pub fn snapshot(&self, version: Option<&str>) -> Option<FeatureGateSnapshot> {
        self.details_for(version).map(|details| {
            FeatureGateSnapshot::new(
                details.enabled.iter().map(|g| g.name.clone()),
                details.disabled.iter().map(|g| g.name.clone()),
            )
        })
    }
}
