//! Domain layer - Snapshot types and port definitions
//!
//! This module defines the immutable cluster snapshots the supervisor reasons
//! about and the core traits (ports) that adapters implement, following
//! hexagonal architecture principles.

pub mod platform;
pub mod ports;

pub use platform::*;
pub use ports::*;
