//! Shared vocabulary for the orchestrator control plane: entity payloads,
//! state machines, KV key layout, and configuration shape. Every one of the
//! four long-running services (API, Manager, Driver, Notification Engine)
//! depends on this crate so they agree on wire formats without talking to
//! each other directly.

pub mod config;
pub mod entities;
pub mod keys;
pub mod status;

pub use config::OrchestratorConfig;
pub use entities::*;
pub use status::{AssignmentStatus, BundleStatus, DeploymentStatus, KernelStatus, StoragePolicyStatus};
