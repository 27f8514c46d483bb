//! Node agent orchestrator.
//!
//! Wires the three control loops together and owns their lifetimes:
//! register the node (fatal on failure), start the status and lease loops
//! in the background, start the reconciler and block until its cache
//! synchronizes (fatal on failure), then block until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use crate::client::ClusterApi;
use crate::config::Config;
use crate::lease::{FailureHandler, LeaseController};
use crate::node::{self, NodeFacts};
use crate::reconciler::WorkloadReconciler;

/// The node agent.
pub struct Agent {
    client: Arc<dyn ClusterApi>,
    config: Config,
    facts: NodeFacts,
    lease_failure_handler: Option<FailureHandler>,
}

impl Agent {
    /// Create an agent with the default node facts.
    pub fn new(client: Arc<dyn ClusterApi>, config: Config) -> Self {
        Self {
            client,
            config,
            facts: NodeFacts::default(),
            lease_failure_handler: None,
        }
    }

    /// Override the facts reported for this node.
    pub fn with_facts(mut self, facts: NodeFacts) -> Self {
        self.facts = facts;
        self
    }

    /// Override the lease escalation handler.
    ///
    /// The default terminates the process; tests inject an observer.
    pub fn with_lease_failure_handler(mut self, handler: FailureHandler) -> Self {
        self.lease_failure_handler = Some(handler);
        self
    }

    /// Run the agent until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let node_name = self.config.node_name.clone();

        // Registration is the agent's identity; there is nothing to do
        // without it and no retry.
        node::register_node(&*self.client, &node_name, &self.facts)
            .await
            .context("node registration failed")?;

        // Status reporting loop.
        let status_handle = tokio::spawn({
            let client = Arc::clone(&self.client);
            let node_name = node_name.clone();
            let facts = self.facts.clone();
            let interval = self.config.status_report_interval();
            let shutdown = shutdown.clone();
            async move {
                node::run_status_loop(&*client, &node_name, &facts, interval, shutdown).await;
            }
        });

        // Lease heartbeat loop. Escalation terminates the process: a node
        // that cannot prove liveness is better restarted than left running
        // degraded.
        let on_failure: FailureHandler = match self.lease_failure_handler {
            Some(handler) => handler,
            None => Box::new(|| {
                error!("Lease heartbeat unsustainable, terminating");
                std::process::exit(1);
            }),
        };
        let lease_handle = tokio::spawn({
            let controller = LeaseController::new(
                Arc::clone(&self.client),
                node_name.clone(),
                self.config.lease_duration_seconds,
                on_failure,
            );
            let shutdown = shutdown.clone();
            async move {
                controller.run(shutdown).await;
            }
        });

        // Workload reconciler: block until its cache is synchronized.
        let reconciler = WorkloadReconciler::new(
            Arc::clone(&self.client),
            node_name.clone(),
            self.config.dwell(),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut reconciler_handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { reconciler.run(ready_tx, shutdown).await }
        });

        match tokio::time::timeout(self.config.sync_timeout(), ready_rx).await {
            Ok(Ok(())) => {}
            // The sender was dropped: the reconciler died during sync.
            Ok(Err(_)) => {
                let cause = match reconciler_handle.await {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(())) => "reconciler exited".to_string(),
                    Err(e) => e.to_string(),
                };
                anyhow::bail!("workload cache synchronization failed: {cause}");
            }
            Err(_) => {
                anyhow::bail!(
                    "workload cache did not synchronize within {:?}",
                    self.config.sync_timeout()
                );
            }
        }

        info!(node = %node_name, "Node agent started");

        // Block until cancelled. A reconciler exit before shutdown means
        // the event stream is gone for good.
        let mut shutdown = shutdown;
        let result = tokio::select! {
            _ = shutdown.changed() => Ok(()),
            result = &mut reconciler_handle => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("workload reconciler failed")),
                Err(e) => Err(anyhow::Error::new(e).context("workload reconciler panicked")),
            },
        };

        // Best-effort shutdown: background loops observe the same channel;
        // in-flight dwell timers are not drained.
        status_handle.abort();
        lease_handle.abort();

        info!(node = %node_name, "Node agent stopped");
        result
    }
}
