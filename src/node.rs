//! Node registration and status reporting.
//!
//! The agent registers its node once at startup and afterwards owns the
//! node's status fields exclusively: capacity, conditions, addresses,
//! runtime info, phase, and the image inventory are re-published on a
//! fixed cadence as a merge-patch.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::api::{
    ContainerImage, Node, NodeAddress, NodeAddressKind, NodeCondition, NodeConditionKind,
    NodePhase, NodeStatus, NodeSystemInfo, ResourceList,
};
use crate::client::{ClientError, ClusterApi};

/// The facts this node reports about itself.
///
/// Passed into registration and reporting explicitly so deployments (and
/// tests) can vary capacity without touching the reporting code.
#[derive(Debug, Clone)]
pub struct NodeFacts {
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    pub addresses: Vec<NodeAddress>,
    pub system_info: NodeSystemInfo,
    pub images: Vec<ContainerImage>,
}

impl Default for NodeFacts {
    fn default() -> Self {
        let capacity = ResourceList {
            cpu: "4".to_string(),
            memory: "8Gi".to_string(),
            ephemeral_storage: "100Gi".to_string(),
        };

        Self {
            allocatable: capacity.clone(),
            capacity,
            addresses: vec![
                NodeAddress {
                    kind: NodeAddressKind::InternalIp,
                    address: "10.0.0.100".to_string(),
                },
                NodeAddress {
                    kind: NodeAddressKind::Hostname,
                    address: "node-1".to_string(),
                },
            ],
            system_info: NodeSystemInfo {
                operating_system: "Linux".to_string(),
                architecture: "x86_64".to_string(),
                kernel_version: "4.19.0-10-amd64".to_string(),
                container_runtime_version: "docker://19.3.13".to_string(),
            },
            images: vec![
                ContainerImage {
                    names: vec!["nginx:latest".to_string()],
                    size_bytes: 12_345_678,
                },
                ContainerImage {
                    names: vec!["busybox:1.32".to_string()],
                    size_bytes: 98_765_432,
                },
            ],
        }
    }
}

/// Build the status document for a report, stamping a fresh Ready condition.
fn build_status(facts: &NodeFacts) -> NodeStatus {
    NodeStatus {
        capacity: facts.capacity.clone(),
        allocatable: facts.allocatable.clone(),
        conditions: vec![NodeCondition {
            kind: NodeConditionKind::Ready,
            status: true,
            last_transition_time: Utc::now(),
        }],
        addresses: facts.addresses.clone(),
        node_info: facts.system_info.clone(),
        phase: NodePhase::Running,
        images: facts.images.clone(),
    }
}

/// Register the node with the control plane.
///
/// Called exactly once at startup; the caller treats failure as fatal
/// because the agent has no identity without it.
pub async fn register_node(
    client: &dyn ClusterApi,
    node_name: &str,
    facts: &NodeFacts,
) -> Result<Node, ClientError> {
    let node = Node {
        name: node_name.to_string(),
        uid: String::new(),
        status: build_status(facts),
    };

    let registered = client.create_node(&node).await?;
    info!(node = %node_name, uid = %registered.uid, "Node registered");
    Ok(registered)
}

/// Publish one status snapshot as a merge-patch keyed by node name.
///
/// Issuing the same report twice is a no-op with respect to observable
/// node state; only the Ready condition timestamp is bumped.
pub async fn report_node_status(
    client: &dyn ClusterApi,
    node_name: &str,
    facts: &NodeFacts,
) -> Result<(), ClientError> {
    let status = build_status(facts);
    client.patch_node_status(node_name, &status).await?;
    debug!(node = %node_name, "Node status reported");
    Ok(())
}

/// Run the status reporting loop until shutdown.
///
/// A patch failure is logged and left for the next tick; silently stale
/// status would be worse than a visible error.
pub async fn run_status_loop(
    client: &dyn ClusterApi,
    node_name: &str,
    facts: &NodeFacts,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        node = %node_name,
        interval_secs = interval.as_secs(),
        "Starting status report loop"
    );

    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if let Err(e) = report_node_status(client, node_name, facts).await {
                    error!(node = %node_name, error = %e, "Failed to report node status");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Status report loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_facts_capacity() {
        let facts = NodeFacts::default();
        assert_eq!(facts.capacity.cpu, "4");
        assert_eq!(facts.capacity.memory, "8Gi");
        assert_eq!(facts.capacity.ephemeral_storage, "100Gi");
        assert_eq!(facts.allocatable, facts.capacity);
    }

    #[test]
    fn test_build_status_single_ready_condition() {
        let status = build_status(&NodeFacts::default());

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].kind, NodeConditionKind::Ready);
        assert!(status.conditions[0].status);
        assert_eq!(status.phase, NodePhase::Running);
    }

    #[test]
    fn test_build_status_bumps_condition_timestamp() {
        let facts = NodeFacts::default();
        let first = build_status(&facts);
        let second = build_status(&facts);

        assert!(
            second.conditions[0].last_transition_time >= first.conditions[0].last_transition_time
        );
    }
}
