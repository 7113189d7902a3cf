//! Tessera: extension installation planning and job scheduling.
//!
//! Computes ordered reconciliation plans (install/upgrade/downgrade/
//! uninstall/repair) against per-namespace installed state, and executes
//! long-running jobs under a hierarchical group-path exclusion discipline
//! with durable, inspectable status.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod extension;
pub mod job;
pub mod logging;
pub mod plan;
pub mod registry;
pub mod version;
