//! Kubernetes Cluster State Adapter
//!
//! Reads the Infrastructure, FeatureGate, CSIDriver and ClusterCSIDriver
//! objects through the API server. The ClusterCSIDriver kind is resolved
//! through API discovery first so a missing CRD is told apart from a missing
//! object; either way the driver counts as not installed.

use crate::crd::{
    ClusterCSIDriver, FeatureGate, Infrastructure, CLUSTER_CSI_DRIVER_GROUP,
    CLUSTER_CSI_DRIVER_KIND, CLUSTER_CSI_DRIVER_VERSION, FEATURE_GATE_NAME, INFRASTRUCTURE_NAME,
};
use crate::domain::platform::{
    DriverObject, DriverObservedState, FeatureGateSnapshot, PlatformSnapshot,
};
use crate::domain::ports::ClusterState;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::CSIDriver;
use kube::api::GroupVersionKind;
use kube::error::DiscoveryError;
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// [`ClusterState`] backed by a live API server
pub struct KubeClusterState {
    client: Client,
    /// Release version whose feature gates apply
    release_version: Option<String>,
    /// Kinds confirmed by discovery, keyed as `Kind.version.group`
    resolved_kinds: Mutex<BTreeSet<String>>,
}

impl KubeClusterState {
    pub fn new(client: Client, release_version: Option<String>) -> Self {
        Self {
            client,
            release_version,
            resolved_kinds: Mutex::new(BTreeSet::new()),
        }
    }

    /// Fail with [`Error::NoKindMatch`] unless the API server serves the kind
    async fn ensure_kind(&self, group: &str, version: &str, kind: &str) -> Result<()> {
        let key = format!("{}.{}.{}", kind, version, group);
        if self.resolved_kinds.lock().contains(&key) {
            return Ok(());
        }

        let gvk = GroupVersionKind::gvk(group, version, kind);
        match kube::discovery::pinned_kind(&self.client, &gvk).await {
            Ok(_) => {
                debug!(kind = %key, "Resolved resource kind");
                self.resolved_kinds.lock().insert(key);
                Ok(())
            }
            Err(kube::Error::Discovery(
                DiscoveryError::MissingKind(_) | DiscoveryError::MissingApiGroup(_),
            )) => Err(no_kind(group, kind)),
            Err(kube::Error::Api(response)) if response.code == 404 => Err(no_kind(group, kind)),
            Err(e) => Err(e.into()),
        }
    }
}

fn no_kind(group: &str, kind: &str) -> Error {
    Error::NoKindMatch {
        group: group.to_string(),
        kind: kind.to_string(),
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn platform_status(&self) -> Result<PlatformSnapshot> {
        let api: Api<Infrastructure> = Api::all(self.client.clone());
        let infra = api.get(INFRASTRUCTURE_NAME).await?;
        Ok(infra.snapshot())
    }

    async fn feature_gates(&self) -> Result<Arc<FeatureGateSnapshot>> {
        let api: Api<FeatureGate> = Api::all(self.client.clone());
        let gate = api
            .get_opt(FEATURE_GATE_NAME)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "FeatureGate".into(),
                name: FEATURE_GATE_NAME.into(),
            })?;

        // Gates for our version are not published until the cluster version
        // operator has rolled the status forward.
        let snapshot = gate
            .snapshot(self.release_version.as_deref())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "FeatureGate version".into(),
                name: self
                    .release_version
                    .clone()
                    .unwrap_or_else(|| FEATURE_GATE_NAME.to_string()),
            })?;

        debug!(
            enabled = ?snapshot.enabled_gates().collect::<Vec<_>>(),
            "Read feature gates"
        );
        Ok(Arc::new(snapshot))
    }

    async fn driver_state(&self, driver_name: &str) -> Result<DriverObservedState> {
        let csi_drivers: Api<CSIDriver> = Api::all(self.client.clone());
        let object = csi_drivers.get_opt(driver_name).await?.map(|d| DriverObject {
            name: d.name_any(),
            annotations: d.annotations().clone(),
        });

        let installed = match self
            .ensure_kind(
                CLUSTER_CSI_DRIVER_GROUP,
                CLUSTER_CSI_DRIVER_VERSION,
                CLUSTER_CSI_DRIVER_KIND,
            )
            .await
        {
            Ok(()) => {
                let cluster_drivers: Api<ClusterCSIDriver> = Api::all(self.client.clone());
                cluster_drivers
                    .get_opt(driver_name)
                    .await
                    .map(|d| d.is_some_and(|d| d.is_installed()))
                    .map_err(Error::from)
            }
            Err(e) => Err(e),
        };

        observed_state(driver_name, object, installed)
    }
}

/// Combine the CSIDriver read with the install check. A ClusterCSIDriver kind
/// that is not served yet means the driver cannot have been installed.
fn observed_state(
    driver_name: &str,
    object: Option<DriverObject>,
    installed: Result<bool>,
) -> Result<DriverObservedState> {
    let already_installed = match installed {
        Ok(installed) => installed,
        Err(e) if e.is_no_match() => {
            debug!(driver = %driver_name, error = %e, "ClusterCSIDriver not served, driver not installed");
            false
        }
        Err(e) => return Err(e),
    };

    Ok(DriverObservedState {
        object,
        already_installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIVER: &str = "csi.test.openshift.io";

    #[test]
    fn test_missing_kind_keeps_driver_object() {
        let state = observed_state(
            DRIVER,
            Some(DriverObject::new(DRIVER)),
            Err(no_kind(CLUSTER_CSI_DRIVER_GROUP, CLUSTER_CSI_DRIVER_KIND)),
        )
        .unwrap();

        assert!(!state.already_installed);
        assert_eq!(state.object, Some(DriverObject::new(DRIVER)));
    }

    #[test]
    fn test_install_check_result_used() {
        let state = observed_state(DRIVER, None, Ok(true)).unwrap();
        assert!(state.already_installed);
        assert!(state.object.is_none());
    }

    #[test]
    fn test_other_errors_propagate() {
        let result = observed_state(
            DRIVER,
            Some(DriverObject::managed(DRIVER)),
            Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            ))),
        );
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
