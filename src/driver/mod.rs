//! CSI Driver Module
//!
//! Static driver descriptors, the built-in catalog, the admission predicate
//! and the asset-backed runner.

pub mod admission;
pub mod catalog;
pub mod config;
pub mod runner;

pub use admission::should_run;
pub use catalog::{builtin_drivers, find_driver, Flavor};
pub use config::*;
pub use runner::{AssetDeploymentRunner, AssetRunnerFactory};
