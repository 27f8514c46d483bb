//! Resource model shared between the agent and the cluster control plane.
//!
//! Three resource kinds matter to the agent:
//! - **Node**: the compute entity this agent represents
//! - **Lease**: the liveness record renewed on a fixed cadence
//! - **Workload**: a schedulable unit of work bound to exactly one node

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Node
// =============================================================================

/// Quantities of a node resource dimension, as quantity strings ("4", "8Gi").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub cpu: String,
    pub memory: String,
    #[serde(rename = "ephemeral-storage")]
    pub ephemeral_storage: String,
}

/// Node condition kinds reported by this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeConditionKind {
    Ready,
}

/// A single node condition with its last transition timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: NodeConditionKind,
    pub status: bool,
    pub last_transition_time: DateTime<Utc>,
}

/// Node address kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAddressKind {
    InternalIp,
    Hostname,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: NodeAddressKind,
    pub address: String,
}

/// Static runtime facts about the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSystemInfo {
    pub operating_system: String,
    pub architecture: String,
    pub kernel_version: String,
    pub container_runtime_version: String,
}

/// Node phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Pending,
    Running,
    Terminated,
}

/// An entry in the node's image inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub names: Vec<String>,
    pub size_bytes: i64,
}

/// The status document the agent owns for its node.
///
/// Applied as a merge-patch: fields the agent does not include are left
/// untouched server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    pub conditions: Vec<NodeCondition>,
    pub addresses: Vec<NodeAddress>,
    pub node_info: NodeSystemInfo,
    pub phase: NodePhase,
    pub images: Vec<ContainerImage>,
}

/// A node object.
///
/// The name is the immutable identity key; the uid is assigned by the
/// control plane at registration and referenced by the lease owner ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    pub status: NodeStatus,
}

// =============================================================================
// Lease
// =============================================================================

/// Back-link from a lease to the node that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerReference {
    /// Owner reference pointing at a node.
    pub fn node(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: "Node".to_string(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}

/// Liveness record bound 1:1 to a node.
///
/// Observers treat the lease as stale when `renew_time` is older than
/// `duration_seconds`; the holder must renew strictly more often than that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub namespace: String,
    pub duration_seconds: u32,
    pub renew_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<OwnerReference>,
}

// =============================================================================
// Workload
// =============================================================================

/// Workload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadPhase::Pending => write!(f, "pending"),
            WorkloadPhase::Running => write!(f, "running"),
            WorkloadPhase::Succeeded => write!(f, "succeeded"),
            WorkloadPhase::Failed => write!(f, "failed"),
            WorkloadPhase::Unknown => write!(f, "unknown"),
        }
    }
}

/// A unit of work scheduled onto this node.
///
/// `phase` is unset for a freshly scheduled workload that no agent has
/// touched yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WorkloadPhase>,
}

impl Workload {
    pub fn key(&self) -> WorkloadKey {
        WorkloadKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Cache key for a workload: (namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A watch event for a workload bound to this node.
///
/// The concrete variant is resolved once at the watch-adapter boundary, so
/// handlers never inspect generic payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "snake_case")]
pub enum WorkloadEvent {
    Added(Workload),
    Updated(Workload),
    Deleted(Workload),
}

impl WorkloadEvent {
    /// The workload carried by this event.
    pub fn workload(&self) -> &Workload {
        match self {
            WorkloadEvent::Added(w) | WorkloadEvent::Updated(w) | WorkloadEvent::Deleted(w) => w,
        }
    }
}
