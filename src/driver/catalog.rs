//! Built-in Driver Catalog
//!
//! The CSI drivers this operator knows how to install, with the location of
//! each driver operator's manifests under the assets root.

use crate::domain::platform::PlatformType;
use crate::driver::config::{DriverAssets, DriverConfig, StatusFilter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Gate guarding the shared resource CSI driver
pub const SHARED_RESOURCE_GATE: &str = "CSIDriverSharedResource";

/// Cluster topology the operator runs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Control plane and workers in the same cluster
    #[default]
    Standalone,
    /// Hosted control plane; driver operators run in the management cluster
    HyperShift,
}

impl Flavor {
    fn asset_dir(&self) -> &'static str {
        match self {
            Flavor::Standalone => "standalone",
            Flavor::HyperShift => "hypershift/guest",
        }
    }
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flavor::Standalone => write!(f, "standalone"),
            Flavor::HyperShift => write!(f, "hypershift"),
        }
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(Flavor::Standalone),
            "hypershift" => Ok(Flavor::HyperShift),
            other => Err(format!("unknown flavor: {}", other)),
        }
    }
}

/// Manifests of `dir` for `flavor`
fn assets(dir: &str, flavor: Flavor) -> DriverAssets {
    let base = format!("csidriveroperators/{}/{}/generated", dir, flavor.asset_dir());
    DriverAssets {
        deployment: format!(
            "{}/apps_v1_deployment_{}-csi-driver-operator.yaml",
            base, dir
        ),
        static_assets: vec![
            format!("{}/v1_serviceaccount_*.yaml", base),
            format!("{}/rbac.authorization.k8s.io_v1_*.yaml", base),
        ],
    }
}

fn platform_driver(name: &str, platform: PlatformType, dir: &str, flavor: Flavor) -> DriverConfig {
    DriverConfig::for_platform(name, platform).with_assets(assets(dir, flavor))
}

/// Drivers for `flavor`. Hosted control planes only support a subset.
pub fn builtin_drivers(flavor: Flavor) -> Vec<DriverConfig> {
    let aws_ebs = platform_driver("ebs.csi.aws.com", PlatformType::AWS, "aws-ebs", flavor);
    let azure_disk = platform_driver("disk.csi.azure.com", PlatformType::Azure, "azure-disk", flavor);
    let azure_file = platform_driver("file.csi.azure.com", PlatformType::Azure, "azure-file", flavor)
        .with_status_filter(StatusFilter::NotAzureStackCloud);

    match flavor {
        Flavor::HyperShift => vec![aws_ebs, azure_disk, azure_file],
        Flavor::Standalone => vec![
            aws_ebs,
            azure_disk,
            azure_file,
            platform_driver("pd.csi.storage.gke.io", PlatformType::GCP, "gcp-pd", flavor),
            platform_driver(
                "csi.vsphere.vmware.com",
                PlatformType::VSphere,
                "vsphere",
                flavor,
            ),
            platform_driver(
                "cinder.csi.openstack.org",
                PlatformType::OpenStack,
                "openstack-cinder",
                flavor,
            ),
            platform_driver(
                "manila.csi.openstack.org",
                PlatformType::OpenStack,
                "openstack-manila",
                flavor,
            ),
            platform_driver("csi.ovirt.org", PlatformType::Ovirt, "ovirt", flavor),
            platform_driver(
                "vpc.block.csi.ibm.io",
                PlatformType::IBMCloud,
                "ibm-vpc-block",
                flavor,
            ),
            platform_driver(
                "powervs.csi.ibm.com",
                PlatformType::PowerVS,
                "ibm-powervs-block",
                flavor,
            ),
            platform_driver(
                "diskplugin.csi.alibabacloud.com",
                PlatformType::AlibabaCloud,
                "alibaba-disk",
                flavor,
            ),
            DriverConfig::for_all_platforms("csi.sharedresource.openshift.io")
                .with_feature_gate(SHARED_RESOURCE_GATE)
                .with_assets(assets("shared-resource", flavor)),
        ],
    }
}

/// Look up one built-in driver by name
pub fn find_driver(flavor: Flavor, driver_name: &str) -> Option<DriverConfig> {
    builtin_drivers(flavor)
        .into_iter()
        .find(|d| d.driver_name == driver_name)
}
