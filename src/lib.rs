//! nodelet — a minimal cluster node agent.
//!
//! The agent represents one compute node to the cluster control plane.
//! It registers the node at startup, then runs three cooperating loops:
//!
//! - **Lease controller**: renews the node's lease on a fixed cadence to
//!   prove liveness, escalating to process termination when the heartbeat
//!   cannot be sustained.
//! - **Status reporter**: periodically publishes capacity, conditions,
//!   addresses, and runtime info as a merge-patch.
//! - **Workload reconciler**: watches workloads bound to this node and
//!   drives them Running -> Succeeded (after a dwell period), finalizing
//!   deletions with a zero-grace hard delete.
//!
//! Workload "running" is simulated status only; this is a control-plane
//! facing stand-in, not an execution substrate.
//!
//! ## Modules
//!
//! - `api`: resource model (Node, Lease, Workload, watch events)
//! - `client`: cluster API seam and its REST implementation
//! - `fake`: in-memory cluster for tests and development
//! - `node`: registration and status reporting
//! - `lease`: lease heartbeat controller
//! - `reconciler`: workload event reconciler
//! - `agent`: orchestrator wiring the loops together

pub mod agent;
pub mod api;
pub mod client;
pub mod config;
pub mod fake;
pub mod lease;
pub mod node;
pub mod reconciler;

// Re-export commonly used types
pub use agent::Agent;
pub use api::{Node, Workload, WorkloadEvent, WorkloadKey, WorkloadPhase};
pub use client::{ClientError, ClusterApi, RestClusterClient};
pub use config::Config;
pub use fake::FakeCluster;
pub use lease::LeaseController;
pub use node::NodeFacts;
pub use reconciler::WorkloadReconciler;
