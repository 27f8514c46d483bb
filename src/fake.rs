//! In-memory cluster implementation for tests and development.
//!
//! `FakeCluster` behaves like a tiny control plane: it stores nodes, leases,
//! and workloads, synthesizes watch events when workloads change, keeps a
//! ledger of every API call for assertions, and can inject failures.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::{Lease, Node, NodeStatus, Workload, WorkloadEvent, WorkloadPhase};
use crate::client::{ClientError, ClusterApi, WorkloadStream};

/// One recorded API call with the arguments tests assert on.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    CreateNode {
        name: String,
    },
    GetNode {
        name: String,
    },
    PatchNodeStatus {
        name: String,
        status: NodeStatus,
    },
    UpsertLease {
        holder: String,
        namespace: String,
        renew_time: DateTime<Utc>,
        has_owner_ref: bool,
    },
    ListWorkloads {
        node_name: String,
    },
    WatchWorkloads {
        node_name: String,
    },
    PatchWorkloadStatus {
        namespace: String,
        name: String,
        phase: WorkloadPhase,
    },
    DeleteWorkload {
        namespace: String,
        name: String,
        grace_period_seconds: u32,
    },
}

#[derive(Debug, Clone)]
struct StoredWorkload {
    workload: Workload,
    /// Set by `evict_workload`: the delete event has been emitted and the
    /// object is waiting for the agent's hard delete.
    deletion_pending: bool,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    leases: HashMap<(String, String), Lease>,
    workloads: HashMap<(String, String), StoredWorkload>,
    watchers: Vec<mpsc::UnboundedSender<WorkloadEvent>>,
    calls: Vec<ApiCall>,
    next_uid: u64,

    fail_create_node: bool,
    fail_list_workloads: bool,
    fail_next_get_nodes: u32,
    fail_next_node_patches: u32,
    fail_next_lease_upserts: u32,
    fail_next_workload_patches: u32,
}

impl State {
    fn emit(&mut self, event: WorkloadEvent) {
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn injected() -> ClientError {
    ClientError::Api {
        status: 500,
        message: "injected failure".to_string(),
    }
}

/// In-memory [`ClusterApi`] implementation.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a workload onto the cluster, emitting an add event.
    pub fn schedule_workload(&self, workload: Workload) {
        let mut state = self.state.lock().unwrap();
        let key = (workload.namespace.clone(), workload.name.clone());
        state.workloads.insert(
            key,
            StoredWorkload {
                workload: workload.clone(),
                deletion_pending: false,
            },
        );
        state.emit(WorkloadEvent::Added(workload));
    }

    /// Mark a workload for deletion, emitting the delete event.
    ///
    /// The object stays in the store until the agent issues the hard
    /// delete, mirroring graceful-deletion semantics.
    pub fn evict_workload(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let workload = state.workloads.get_mut(&key).map(|stored| {
            stored.deletion_pending = true;
            stored.workload.clone()
        });
        if let Some(workload) = workload {
            state.emit(WorkloadEvent::Deleted(workload));
        }
    }

    /// Re-emit an update event for a workload without changing it.
    ///
    /// Models external no-op writes that still wake up watchers.
    pub fn touch_workload(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let workload = state
            .workloads
            .get(&key)
            .map(|stored| stored.workload.clone());
        if let Some(workload) = workload {
            state.emit(WorkloadEvent::Updated(workload));
        }
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(name).cloned()
    }

    pub fn lease(&self, namespace: &str, holder: &str) -> Option<Lease> {
        self.state
            .lock()
            .unwrap()
            .leases
            .get(&(namespace.to_string(), holder.to_string()))
            .cloned()
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .map(|stored| stored.workload.clone())
    }

    /// Snapshot of the call ledger.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_create_node(&self) {
        self.state.lock().unwrap().fail_create_node = true;
    }

    pub fn fail_list_workloads(&self) {
        self.state.lock().unwrap().fail_list_workloads = true;
    }

    /// Fail the next `n` get-node calls.
    pub fn fail_next_get_nodes(&self, n: u32) {
        self.state.lock().unwrap().fail_next_get_nodes = n;
    }

    /// Fail the next `n` node status patches.
    pub fn fail_next_node_patches(&self, n: u32) {
        self.state.lock().unwrap().fail_next_node_patches = n;
    }

    /// Fail the next `n` lease upserts.
    pub fn fail_next_lease_upserts(&self, n: u32) {
        self.state.lock().unwrap().fail_next_lease_upserts = n;
    }

    /// Fail the next `n` workload status patches.
    pub fn fail_next_workload_patches(&self, n: u32) {
        self.state.lock().unwrap().fail_next_workload_patches = n;
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_node(&self, node: &Node) -> Result<Node, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::CreateNode {
            name: node.name.clone(),
        });

        if state.fail_create_node {
            return Err(injected());
        }
        if state.nodes.contains_key(&node.name) {
            return Err(ClientError::Api {
                status: 409,
                message: format!("node {} already exists", node.name),
            });
        }

        state.next_uid += 1;
        let mut created = node.clone();
        created.uid = format!("uid-{:04}", state.next_uid);
        state.nodes.insert(node.name.clone(), created.clone());
        Ok(created)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::GetNode {
            name: name.to_string(),
        });

        if take_failure(&mut state.fail_next_get_nodes) {
            return Err(injected());
        }

        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "node",
                name: name.to_string(),
            })
    }

    async fn patch_node_status(&self, name: &str, status: &NodeStatus) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::PatchNodeStatus {
            name: name.to_string(),
            status: status.clone(),
        });

        if take_failure(&mut state.fail_next_node_patches) {
            return Err(injected());
        }

        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound {
                kind: "node",
                name: name.to_string(),
            })?;
        node.status = status.clone();
        Ok(())
    }

    async fn upsert_lease(&self, lease: &Lease) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::UpsertLease {
            holder: lease.holder.clone(),
            namespace: lease.namespace.clone(),
            renew_time: lease.renew_time,
            has_owner_ref: lease.owner_ref.is_some(),
        });

        if take_failure(&mut state.fail_next_lease_upserts) {
            return Err(injected());
        }

        state.leases.insert(
            (lease.namespace.clone(), lease.holder.clone()),
            lease.clone(),
        );
        Ok(())
    }

    async fn list_workloads(&self, node_name: &str) -> Result<Vec<Workload>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::ListWorkloads {
            node_name: node_name.to_string(),
        });

        if state.fail_list_workloads {
            return Err(injected());
        }

        Ok(state
            .workloads
            .values()
            .filter(|stored| stored.workload.node_name == node_name && !stored.deletion_pending)
            .map(|stored| stored.workload.clone())
            .collect())
    }

    async fn watch_workloads(&self, node_name: &str) -> Result<WorkloadStream, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::WatchWorkloads {
            node_name: node_name.to_string(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn patch_workload_status(
        &self,
        namespace: &str,
        name: &str,
        phase: WorkloadPhase,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::PatchWorkloadStatus {
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase,
        });

        if take_failure(&mut state.fail_next_workload_patches) {
            return Err(injected());
        }

        let key = (namespace.to_string(), name.to_string());
        let stored = state
            .workloads
            .get_mut(&key)
            .ok_or_else(|| ClientError::NotFound {
                kind: "workload",
                name: format!("{namespace}/{name}"),
            })?;

        stored.workload.phase = Some(phase);
        let updated = stored.workload.clone();
        state.emit(WorkloadEvent::Updated(updated));
        Ok(())
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::DeleteWorkload {
            namespace: namespace.to_string(),
            name: name.to_string(),
            grace_period_seconds,
        });

        let key = (namespace.to_string(), name.to_string());
        let stored = state.workloads.remove(&key).ok_or(ClientError::NotFound {
            kind: "workload",
            name: format!("{namespace}/{name}"),
        })?;

        // An evicted workload already had its delete event emitted.
        if !stored.deletion_pending {
            state.emit(WorkloadEvent::Deleted(stored.workload));
        }
        Ok(())
    }
}
