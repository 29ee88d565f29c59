//! Hub-spoke network topology reconciler.
//!
//! Reads a declared topology (segments, subnets, peerings, private DNS zones,
//! resolvers and point-to-site VPN gateways), validates it against the
//! structural invariants of a hub-spoke network, diffs it with what the
//! provider reports and executes the resulting plan in dependency order.
//!
//! - [`topology`] - desired state document and model
//! - [`validate`] - invariant rules
//! - [`diff`] - observed vs desired, dependency edges
//! - [`plan`] - plan state machine and reports
//! - [`executor`] - bounded concurrent execution with retry
//! - [`drift`] - observed-state cache and drift detection
//! - [`reconciler`] - one full cycle under the executing lease

pub mod cache;
pub mod config;
pub mod diff;
pub mod drift;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod topology;
pub mod validate;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use executor::CancellationHandle;
pub use reconciler::Reconciler;
pub use topology::{TopologyDocument, TopologyModel};
