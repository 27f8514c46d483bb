//! Cluster API client for the node agent.
//!
//! `ClusterApi` is the seam between the control loops and the control
//! plane: typed CRUD on nodes and leases, plus a server-side filtered
//! watch over the workloads bound to this node. The production
//! implementation is a thin REST client; tests use [`crate::fake::FakeCluster`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::api::{Lease, Node, NodeStatus, Workload, WorkloadEvent, WorkloadPhase};

/// Delay before re-opening a dropped watch connection.
const WATCH_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Errors returned by cluster API operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The object does not exist. Expected for delete/patch races against
    /// already-deleted workloads; callers must not escalate it.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The control plane rejected the request.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The watch stream ended and could not be resumed.
    #[error("watch stream closed")]
    WatchClosed,
}

impl ClientError {
    /// True for the ignorable already-gone case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Server-pushed, per-key ordered sequence of workload events.
pub type WorkloadStream = Pin<Box<dyn Stream<Item = WorkloadEvent> + Send>>;

/// Typed operations the agent needs from the control plane.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Register a node. The returned object carries the server-assigned uid.
    async fn create_node(&self, node: &Node) -> Result<Node, ClientError>;

    /// Fetch a node by name.
    async fn get_node(&self, name: &str) -> Result<Node, ClientError>;

    /// Merge-patch the node's status document.
    async fn patch_node_status(&self, name: &str, status: &NodeStatus) -> Result<(), ClientError>;

    /// Create or update the lease keyed by (namespace, holder).
    async fn upsert_lease(&self, lease: &Lease) -> Result<(), ClientError>;

    /// List the workloads currently bound to the given node.
    async fn list_workloads(&self, node_name: &str) -> Result<Vec<Workload>, ClientError>;

    /// Open an infinite watch over the workloads bound to the given node.
    async fn watch_workloads(&self, node_name: &str) -> Result<WorkloadStream, ClientError>;

    /// Patch a workload's status phase.
    async fn patch_workload_status(
        &self,
        namespace: &str,
        name: &str,
        phase: WorkloadPhase,
    ) -> Result<(), ClientError>;

    /// Hard-delete a workload.
    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), ClientError>;
}

#[derive(serde::Serialize)]
struct WorkloadStatusPatch {
    phase: WorkloadPhase,
}

/// REST implementation of [`ClusterApi`].
pub struct RestClusterClient {
    client: reqwest::Client,
    /// Separate client without a request timeout for long-lived watches.
    watch_client: reqwest::Client,
    base_url: String,
}

impl RestClusterClient {
    /// Create a new REST client against the given control plane base URL.
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        let watch_client = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            watch_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check(
        response: reqwest::Response,
        kind: &'static str,
        name: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Read one watch connection, forwarding parsed NDJSON events.
    ///
    /// Returns when the connection drops or the receiver is gone.
    async fn pump_watch(
        watch_client: &reqwest::Client,
        url: &str,
        tx: &mpsc::Sender<WorkloadEvent>,
    ) -> Result<(), ClientError> {
        let response = watch_client.get(url).send().await?;
        let response = Self::check(response, "watch", url).await?;

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_slice::<WorkloadEvent>(line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed watch line");
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ClusterApi for RestClusterClient {
    async fn create_node(&self, node: &Node) -> Result<Node, ClientError> {
        let url = format!("{}/v1/nodes", self.base_url);
        debug!(node = %node.name, "Creating node");

        let response = self.client.post(&url).json(node).send().await?;
        let response = Self::check(response, "node", &node.name).await?;
        Ok(response.json().await?)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        let url = format!("{}/v1/nodes/{}", self.base_url, name);
        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, "node", name).await?;
        Ok(response.json().await?)
    }

    async fn patch_node_status(&self, name: &str, status: &NodeStatus) -> Result<(), ClientError> {
        let url = format!("{}/v1/nodes/{}/status", self.base_url, name);
        debug!(node = %name, "Patching node status");

        let response = self.client.patch(&url).json(status).send().await?;
        Self::check(response, "node", name).await?;
        Ok(())
    }

    async fn upsert_lease(&self, lease: &Lease) -> Result<(), ClientError> {
        let url = format!(
            "{}/v1/namespaces/{}/leases/{}",
            self.base_url, lease.namespace, lease.holder
        );

        let response = self.client.put(&url).json(lease).send().await?;
        Self::check(response, "lease", &lease.holder).await?;
        Ok(())
    }

    async fn list_workloads(&self, node_name: &str) -> Result<Vec<Workload>, ClientError> {
        let url = format!("{}/v1/workloads?node={}", self.base_url, node_name);
        debug!(node = %node_name, "Listing workloads");

        let response = self.client.get(&url).send().await?;
        let response = Self::check(response, "workloads", node_name).await?;
        Ok(response.json().await?)
    }

    async fn watch_workloads(&self, node_name: &str) -> Result<WorkloadStream, ClientError> {
        let url = format!(
            "{}/v1/workloads?node={}&watch=true",
            self.base_url, node_name
        );
        let watch_client = self.watch_client.clone();
        let (tx, rx) = mpsc::channel(64);

        // The stream is restartable: a dropped connection is re-opened after
        // a short delay until the consumer goes away.
        tokio::spawn(async move {
            loop {
                match Self::pump_watch(&watch_client, &url, &tx).await {
                    Ok(()) => {
                        if tx.is_closed() {
                            return;
                        }
                        debug!(url = %url, "Watch connection ended, reconnecting");
                    }
                    Err(e) => {
                        if tx.is_closed() {
                            return;
                        }
                        warn!(url = %url, error = %e, "Watch connection failed, reconnecting");
                    }
                }
                tokio::time::sleep(WATCH_RECONNECT_DELAY).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn patch_workload_status(
        &self,
        namespace: &str,
        name: &str,
        phase: WorkloadPhase,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/v1/namespaces/{}/workloads/{}/status",
            self.base_url, namespace, name
        );
        debug!(workload = %format!("{namespace}/{name}"), phase = %phase, "Patching workload status");

        let response = self
            .client
            .patch(&url)
            .json(&WorkloadStatusPatch { phase })
            .send()
            .await?;
        Self::check(response, "workload", name).await?;
        Ok(())
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/v1/namespaces/{}/workloads/{}?grace_period_seconds={}",
            self.base_url, namespace, name, grace_period_seconds
        );

        let response = self.client.delete(&url).send().await?;
        Self::check(response, "workload", name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_ignorable() {
        let err = ClientError::NotFound {
            kind: "workload",
            name: "p1".to_string(),
        };
        assert!(err.is_not_found());

        let err = ClientError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RestClusterClient::new("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_status_patch_body() {
        let patch = WorkloadStatusPatch {
            phase: WorkloadPhase::Running,
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, "{\"phase\":\"running\"}");
    }
}
