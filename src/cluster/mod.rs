//! Cluster State Adapters
//!
//! Implementations of the [`ClusterState`](crate::domain::ports::ClusterState)
//! port and the watchers that deliver change notices.

pub mod kube_state;
pub mod memory;
pub mod watch;

pub use kube_state::KubeClusterState;
pub use memory::{InMemoryClusterState, InjectedFailure};
pub use watch::{notice_channel, notify, spawn_watchers, NOTICE_QUEUE_DEPTH};
