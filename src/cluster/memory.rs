//! In-memory Cluster State
//!
//! A [`ClusterState`] whose snapshots are set directly. Used by tests and
//! benchmarks, and for dry runs without an API server.

use crate::crd::{CLUSTER_CSI_DRIVER_GROUP, CLUSTER_CSI_DRIVER_KIND};
use crate::domain::platform::{
    DriverObject, DriverObservedState, FeatureGateSnapshot, PlatformSnapshot,
};
use crate::domain::ports::{ChangeNotice, ClusterState, NoticeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::watch::notify;

/// Failure to inject into reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The ClusterCSIDriver CRD is not installed
    NoKindMatch,
    /// The API server is unreachable
    Unavailable,
    /// Permission denied
    Forbidden,
}

impl InjectedFailure {
    fn to_error(self) -> Error {
        match self {
            InjectedFailure::NoKindMatch => Error::NoKindMatch {
                group: CLUSTER_CSI_DRIVER_GROUP.to_string(),
                kind: CLUSTER_CSI_DRIVER_KIND.to_string(),
            },
            InjectedFailure::Unavailable => {
                Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
            }
            InjectedFailure::Forbidden => {
                Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
            }
        }
    }
}

#[derive(Default)]
struct State {
    platform: PlatformSnapshot,
    gates: Arc<FeatureGateSnapshot>,
    objects: BTreeMap<String, DriverObject>,
    installed: BTreeMap<String, bool>,
    platform_failure: Option<InjectedFailure>,
    driver_failures: BTreeMap<String, InjectedFailure>,
}

/// [`ClusterState`] held in memory; every setter replaces a snapshot wholesale
#[derive(Default)]
pub struct InMemoryClusterState {
    state: RwLock<State>,
    notifier: Option<mpsc::Sender<ChangeNotice>>,
}

impl InMemoryClusterState {
    pub fn new(platform: PlatformSnapshot, gates: FeatureGateSnapshot) -> Self {
        Self {
            state: RwLock::new(State {
                platform,
                gates: Arc::new(gates),
                ..State::default()
            }),
            notifier: None,
        }
    }

    /// Send a notice after every change
    pub fn with_notifier(mut self, tx: mpsc::Sender<ChangeNotice>) -> Self {
        self.notifier = Some(tx);
        self
    }

    fn changed(&self, source: NoticeSource) {
        if let Some(tx) = &self.notifier {
            notify(tx, source);
        }
    }

    pub fn set_platform(&self, platform: PlatformSnapshot) {
        self.state.write().platform = platform;
        self.changed(NoticeSource::Infrastructure);
    }

    pub fn set_feature_gates(&self, gates: FeatureGateSnapshot) {
        self.state.write().gates = Arc::new(gates);
        self.changed(NoticeSource::FeatureGate);
    }

    pub fn set_driver_object(&self, driver_name: &str, object: Option<DriverObject>) {
        {
            let mut state = self.state.write();
            match object {
                Some(object) => state.objects.insert(driver_name.to_string(), object),
                None => state.objects.remove(driver_name),
            };
        }
        self.changed(NoticeSource::CsiDriver);
    }

    pub fn set_installed(&self, driver_name: &str, installed: bool) {
        self.state
            .write()
            .installed
            .insert(driver_name.to_string(), installed);
        self.changed(NoticeSource::ClusterCsiDriver);
    }

    pub fn fail_platform_reads(&self, failure: Option<InjectedFailure>) {
        self.state.write().platform_failure = failure;
        self.changed(NoticeSource::Manual);
    }

    pub fn fail_driver_reads(&self, driver_name: &str, failure: Option<InjectedFailure>) {
        {
            let mut state = self.state.write();
            match failure {
                Some(failure) => state.driver_failures.insert(driver_name.to_string(), failure),
                None => state.driver_failures.remove(driver_name),
            };
        }
        self.changed(NoticeSource::Manual);
    }
}

#[async_trait]
impl ClusterState for InMemoryClusterState {
    async fn platform_status(&self) -> Result<PlatformSnapshot> {
        let state = self.state.read();
        match state.platform_failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(state.platform.clone()),
        }
    }

    async fn feature_gates(&self) -> Result<Arc<FeatureGateSnapshot>> {
        Ok(self.state.read().gates.clone())
    }

    async fn driver_state(&self, driver_name: &str) -> Result<DriverObservedState> {
        let state = self.state.read();
        if let Some(failure) = state.driver_failures.get(driver_name) {
            return Err(failure.to_error());
        }
        Ok(DriverObservedState {
            object: state.objects.get(driver_name).cloned(),
            already_installed: state.installed.get(driver_name).copied().unwrap_or(false),
        })
    }
}
