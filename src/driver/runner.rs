//! Asset-backed Driver Runner
//!
//! Runs a CSI driver operator by applying its static objects (service
//! accounts, RBAC) and its Deployment manifest from the assets directory, and
//! re-applying them on a resync interval until cancelled.

use crate::domain::ports::{DriverRunner, RunnerFactory};
use crate::driver::config::DriverConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::Scope;
use kube::{Api, Client, ResourceExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "csi-driver-starter";

// =============================================================================
// Asset Loading
// =============================================================================

/// Read and parse a Deployment manifest
pub fn load_deployment(path: &Path) -> Result<Deployment> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::Asset {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let deployment: Deployment = serde_yaml::from_str(&raw)?;
    if deployment.metadata.name.is_none() {
        return Err(Error::Asset {
            path: path.display().to_string(),
            reason: "deployment has no name".to_string(),
        });
    }
    Ok(deployment)
}

/// Read and parse a static object manifest
pub fn load_static_object(path: &Path) -> Result<DynamicObject> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::Asset {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let object: DynamicObject = serde_yaml::from_str(&raw)?;
    if object.metadata.name.is_none() {
        return Err(Error::Asset {
            path: path.display().to_string(),
            reason: "object has no name".to_string(),
        });
    }
    object_gvk(&object).map_err(|_| Error::Asset {
        path: path.display().to_string(),
        reason: "object has no apiVersion or kind".to_string(),
    })?;
    Ok(object)
}

/// Group, version and kind of a parsed object
pub fn object_gvk(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .filter(|t| !t.api_version.is_empty() && !t.kind.is_empty())
        .ok_or_else(|| {
            Error::Internal(format!("{} has no type information", object.name_any()))
        })?;
    let (group, version) = types
        .api_version
        .rsplit_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Expand static asset patterns under `root`. Every pattern must match.
pub fn resolve_static_assets(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let full = root.join(pattern);
        let full = full.to_string_lossy();
        let matches = glob::glob(&full).map_err(|e| Error::Asset {
            path: pattern.clone(),
            reason: e.to_string(),
        })?;

        let before = files.len();
        for entry in matches {
            let path = entry.map_err(|e| Error::Asset {
                path: pattern.clone(),
                reason: e.to_string(),
            })?;
            files.push(path);
        }
        if files.len() == before {
            return Err(Error::Asset {
                path: pattern.clone(),
                reason: "pattern matched no files".to_string(),
            });
        }
    }
    files.sort();
    Ok(files)
}

// =============================================================================
// Runner Factory
// =============================================================================

/// Builds [`AssetDeploymentRunner`]s from the assets directory
pub struct AssetRunnerFactory {
    assets_dir: PathBuf,
    client: Client,
    namespace: String,
    resync: Duration,
}

impl AssetRunnerFactory {
    pub fn new(
        assets_dir: impl Into<PathBuf>,
        client: Client,
        namespace: impl Into<String>,
        resync: Duration,
    ) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            client,
            namespace: namespace.into(),
            resync,
        }
    }
}

impl RunnerFactory for AssetRunnerFactory {
    fn new_runner(&self, config: &DriverConfig) -> Result<Box<dyn DriverRunner>> {
        let deployment = load_deployment(&self.assets_dir.join(&config.assets.deployment))?;
        let static_objects = resolve_static_assets(&self.assets_dir, &config.assets.static_assets)?
            .iter()
            .map(|path| load_static_object(path))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            driver = %config.driver_name,
            static_objects = static_objects.len(),
            "Loaded driver operator assets"
        );

        Ok(Box::new(AssetDeploymentRunner {
            driver: config.driver_name.clone(),
            deployment,
            static_objects,
            api: Api::namespaced(self.client.clone(), &self.namespace),
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            resync: self.resync,
        }))
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Keeps one driver operator Deployment and its static objects applied
pub struct AssetDeploymentRunner {
    driver: String,
    deployment: Deployment,
    static_objects: Vec<DynamicObject>,
    api: Api<Deployment>,
    client: Client,
    namespace: String,
    resync: Duration,
}

impl AssetDeploymentRunner {
    async fn apply_static(&self, object: &DynamicObject, params: &PatchParams) -> Result<()> {
        let gvk = object_gvk(object)?;
        let (resource, capabilities) = kube::discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => {
                Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        api.patch(&object.name_any(), params, &Patch::Apply(object))
            .await?;
        debug!(driver = %self.driver, kind = %gvk.kind, name = %object.name_any(), "Applied static object");
        Ok(())
    }

    async fn apply(&self) -> Result<()> {
        let name = self.deployment.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();

        // RBAC and service accounts must exist before the operator pod starts
        for object in &self.static_objects {
            self.apply_static(object, &params).await?;
        }

        self.api
            .patch(&name, &params, &Patch::Apply(&self.deployment))
            .await?;
        debug!(driver = %self.driver, deployment = %name, "Applied driver operator deployment");
        Ok(())
    }
}

#[async_trait]
impl DriverRunner for AssetDeploymentRunner {
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<()> {
        info!(driver = %self.driver, "Driver runner started");

        loop {
            if let Err(e) = self.apply().await {
                warn!(driver = %self.driver, error = %e, "Failed to apply driver operator deployment");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resync) => {}
            }
        }

        info!(driver = %self.driver, "Driver runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: aws-ebs-csi-driver-operator
  namespace: openshift-cluster-csi-drivers
spec:
  selector:
    matchLabels:
      name: aws-ebs-csi-driver-operator
  template:
    metadata:
      labels:
        name: aws-ebs-csi-driver-operator
    spec:
      containers:
        - name: operator
          image: quay.io/openshift/origin-aws-ebs-csi-driver-operator:latest
"#;

    #[test]
    fn test_load_deployment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deployment.yaml");
        fs::write(&path, DEPLOYMENT).unwrap();

        let deployment = load_deployment(&path).unwrap();
        assert_eq!(deployment.name_any(), "aws-ebs-csi-driver-operator");
    }

    #[test]
    fn test_load_deployment_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load_deployment(&dir.path().join("absent.yaml"));
        assert_matches!(result, Err(Error::Asset { .. }));
    }

    #[test]
    fn test_load_deployment_without_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deployment.yaml");
        fs::write(&path, "apiVersion: apps/v1\nkind: Deployment\nmetadata: {}\n").unwrap();
        assert_matches!(load_deployment(&path), Err(Error::Asset { .. }));
    }

    #[test]
    fn test_load_static_objects() {
        let dir = TempDir::new().unwrap();
        let account = dir.path().join("v1_serviceaccount_operator.yaml");
        fs::write(
            &account,
            "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: aws-ebs-csi-driver-operator\n",
        )
        .unwrap();
        let role = dir.path().join("rbac.authorization.k8s.io_v1_clusterrole.yaml");
        fs::write(
            &role,
            "apiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: aws-ebs-csi-driver-operator-clusterrole\nrules: []\n",
        )
        .unwrap();

        let account = load_static_object(&account).unwrap();
        assert_eq!(
            object_gvk(&account).unwrap(),
            GroupVersionKind::gvk("", "v1", "ServiceAccount")
        );

        let role = load_static_object(&role).unwrap();
        assert_eq!(role.name_any(), "aws-ebs-csi-driver-operator-clusterrole");
        assert_eq!(
            object_gvk(&role).unwrap(),
            GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRole")
        );
    }

    #[test]
    fn test_load_static_object_without_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v1_serviceaccount_operator.yaml");
        fs::write(&path, "apiVersion: v1\nkind: ServiceAccount\nmetadata: {}\n").unwrap();
        assert_matches!(load_static_object(&path), Err(Error::Asset { .. }));
    }

    #[test]
    fn test_resolve_static_assets() {
        let dir = TempDir::new().unwrap();
        let generated = dir.path().join("generated");
        fs::create_dir_all(&generated).unwrap();
        fs::write(generated.join("v1_serviceaccount_operator.yaml"), "").unwrap();
        fs::write(generated.join("rbac.authorization.k8s.io_v1_role.yaml"), "").unwrap();
        fs::write(generated.join("rbac.authorization.k8s.io_v1_rolebinding.yaml"), "").unwrap();

        let patterns = vec![
            "generated/v1_serviceaccount_*.yaml".to_string(),
            "generated/rbac.authorization.k8s.io_v1_*.yaml".to_string(),
        ];
        let files = resolve_static_assets(dir.path(), &patterns).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_resolve_static_assets_unmatched_pattern() {
        let dir = TempDir::new().unwrap();
        let patterns = vec!["generated/*.yaml".to_string()];
        assert_matches!(
            resolve_static_assets(dir.path(), &patterns),
            Err(Error::Asset { .. })
        );
    }
}
